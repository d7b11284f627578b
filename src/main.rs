//! reqmeter HTTP server
//!
//! Starts an Axum web server with request instrumentation, the background
//! sampler and a Prometheus scrape endpoint.

use axum::{Router, routing::get};
use clap::Parser;
use reqmeter::{
    cli::{Cli, Command, generate_config_template},
    config::Config,
    handlers::{self, AppState},
    router::{InstrumentedRouter, RouteResolver},
    telemetry,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

fn socket_addr(host: &str, port: u16) -> SocketAddr {
    let ip = host
        .parse::<IpAddr>()
        .unwrap_or_else(|_| IpAddr::from([0, 0, 0, 0]));
    SocketAddr::from((ip, port))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(Command::Config { output }) = &cli.command {
        match output {
            Some(path) => {
                std::fs::write(path, generate_config_template())?;
                println!("Configuration template written to {}", path);
            }
            None => print!("{}", generate_config_template()),
        }
        return Ok(());
    }

    // Load configuration
    let mut config = Config::from_file(&cli.config)?;
    config.apply_env_overrides()?;

    if matches!(cli.command, Some(Command::Check)) {
        println!("Configuration '{}' is valid", cli.config);
        return Ok(());
    }

    // Initialize telemetry
    telemetry::init(&config.observability.log_level);

    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config))?;

    let metrics_enabled = config.metrics.enabled;
    let metrics_inline = metrics_enabled && config.metrics_on_app_port();

    // Build router; every route lands in the resolver's table
    let mut routes = InstrumentedRouter::<AppState>::new().route("/health", get(handlers::health::handler));
    if metrics_inline {
        routes = routes.route("/metrics", get(handlers::metrics::handler));
    }
    let (router, table) = routes.into_parts()?;

    let resolver = Arc::new(RouteResolver::with_cache_capacity(
        table,
        config.metrics.gateways.clone(),
        config.metrics.route_cache_capacity,
    ));
    let app = state
        .request_metrics(resolver)
        .apply(router)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    // Dedicated scrape listener when metrics use their own port
    if metrics_enabled && !metrics_inline {
        let metrics_addr = socket_addr(&config.server.host, config.metrics.port);
        let metrics_app = Router::new()
            .route("/metrics", get(handlers::metrics::handler))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind(metrics_addr).await?;
        tracing::info!("Metrics available at http://{}/metrics", metrics_addr);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics_app).await {
                tracing::error!(error = %e, "Metrics listener stopped");
            }
        });
    }

    let sampler_handle = if metrics_enabled {
        Arc::clone(state.sampler()).start()
    } else {
        tracing::info!("Metrics disabled, background sampler not started");
        None
    };

    let addr = socket_addr(&config.server.host, config.server.port);

    tracing::info!(
        "Starting reqmeter server on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Health check available at http://{}/health", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sampler().shutdown();
    if let Some(handle) = sampler_handle
        && let Err(e) = handle.await
    {
        tracing::error!(error = %e, "Sampler monitor task failed");
    }

    Ok(())
}
