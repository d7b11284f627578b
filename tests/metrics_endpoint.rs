//! Integration tests for the scrape and health endpoints
//!
//! Builds the application the way the binary does (instrumented router,
//! request metrics middleware, shared `AppState`) and scrapes it.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    routing::get,
};
use reqmeter::config::Config;
use reqmeter::handlers::{self, AppState};
use reqmeter::router::{InstrumentedRouter, RouteResolver};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

fn build_app(config_toml: &str) -> (Router, AppState) {
    let config = Arc::new(Config::from_str(config_toml).expect("valid config"));
    let state = AppState::new(Arc::clone(&config)).expect("state");

    let (router, table) = InstrumentedRouter::<AppState>::new()
        .route("/health", get(handlers::health::handler))
        .route("/metrics", get(handlers::metrics::handler))
        .route("/items/{id}", get(|| async { "item" }))
        .into_parts()
        .expect("valid routes");

    let resolver = Arc::new(RouteResolver::with_cache_capacity(
        table,
        config.metrics.gateways.clone(),
        config.metrics.route_cache_capacity,
    ));
    let app = state
        .request_metrics(resolver)
        .apply(router)
        .with_state(state.clone());
    (app, state)
}

const CONFIG: &str = r#"
[server]
host = "127.0.0.1"
port = 3000

[metrics]
port = 3000
prefix = "lead_ignite_"
testing = true

[metrics.default_labels]
service = "lead_ignite"
environment = "test"
"#;

async fn get_body(app: &Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_scrape_reports_requests_by_template() {
    let (app, _state) = build_app(CONFIG);

    for id in ["1", "2", "abc"] {
        let (status, _) = get_body(&app, &format!("/items/{}", id)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get_body(&app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let line = body
        .lines()
        .find(|l| l.starts_with("lead_ignite_http_requests_total{") && l.contains(r#"route="/items/{id}""#))
        .expect("request counter line present");
    assert!(line.contains(r#"service="lead_ignite""#));
    assert!(line.contains(r#"environment="test""#));
    assert!(line.ends_with(" 3"), "unexpected line: {}", line);

    assert!(body.contains("# TYPE lead_ignite_http_request_duration_seconds histogram"));
    assert!(!body.contains(r#"route="/items/1""#));
}

#[tokio::test]
async fn test_scrape_output_is_valid_exposition_format() {
    let (app, state) = build_app(CONFIG);
    get_body(&app, "/items/9").await;
    state.sampler().tick().await;

    let (_, body) = get_body(&app, "/metrics").await;
    let metric_lines: Vec<&str> = body
        .lines()
        .filter(|line| !line.starts_with('#') && !line.trim().is_empty())
        .collect();
    assert!(!metric_lines.is_empty());

    for line in &metric_lines {
        assert!(line.starts_with("lead_ignite_"), "unprefixed metric: {}", line);
        let last_token = line.split_whitespace().last().unwrap();
        assert!(
            last_token.parse::<f64>().is_ok() || last_token == "+Inf" || last_token == "NaN",
            "line should end with a number: {}",
            line
        );
    }
}

#[tokio::test]
async fn test_health_reports_sampler_status() {
    let (app, _state) = build_app(CONFIG);
    get_body(&app, "/items/1").await;
    get_body(&app, "/items/2").await;

    let (status, body) = get_body(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "OK");
    assert_eq!(json["sampler"], "idle");
    assert_eq!(json["dependencies_status"], "operational");
    assert_eq!(json["metrics_enabled"], true);
    assert_eq!(json["requests_recorded"], 2.0);
}

#[tokio::test]
async fn test_scrapes_are_themselves_counted() {
    let (app, state) = build_app(CONFIG);
    get_body(&app, "/metrics").await;
    get_body(&app, "/metrics").await;

    assert_eq!(
        state
            .catalog()
            .request_count()
            .value(&[("route", "/metrics"), ("status", "200")]),
        2.0
    );
}
