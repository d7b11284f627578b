//! Request instrumentation middleware
//!
//! Records `http_requests_total{method, route, status}` and
//! `http_request_duration_seconds{method, route, status}` for every request,
//! labeled with the route template the request matched. Requests under a
//! gateway namespace also count towards `gateway_calls_total` and
//! `gateway_request_duration_seconds`, keyed by the endpoint segments of the
//! concrete path.
//!
//! Recording happens in a drop guard, so a handler that panics (or a request
//! future dropped mid-flight) is still counted exactly once, as a `500`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::metrics::InstrumentCatalog;
use crate::router::{ResolvedRoute, RouteResolver};

/// State for [`track_requests`]
#[derive(Clone)]
pub struct RequestMetrics {
    catalog: Arc<InstrumentCatalog>,
    resolver: Arc<RouteResolver>,
    enabled: bool,
}

impl RequestMetrics {
    pub fn new(catalog: Arc<InstrumentCatalog>, resolver: Arc<RouteResolver>, enabled: bool) -> Self {
        Self {
            catalog,
            resolver,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.catalog
    }

    pub fn resolver(&self) -> &RouteResolver {
        &self.resolver
    }

    /// Wrap every route of `router` with [`track_requests`]
    pub fn apply<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum::middleware::from_fn_with_state(self, track_requests))
    }
}

/// Records one request when dropped
struct RequestGuard {
    metrics: RequestMetrics,
    method: Method,
    route: ResolvedRoute,
    start: Instant,
    status: Option<StatusCode>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        // No status means the handler never produced a response
        let status = self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let status_label = status.as_u16().to_string();
        let method = self.method.as_str();
        let route = self.route.template.as_str();

        if self.status.is_none() {
            tracing::warn!(
                method = %method,
                route = %route,
                panicking = std::thread::panicking(),
                "Request did not complete, recording as 500"
            );
        }

        let catalog = &self.metrics.catalog;
        let labels = [method, route, status_label.as_str()];

        if let Err(e) = catalog.request_count().inc(&labels) {
            tracing::warn!(error = %e, route = %route, "Failed to record request count");
        }
        if let Err(e) = catalog.request_latency().observe_duration(&labels, elapsed) {
            tracing::warn!(error = %e, route = %route, "Failed to record request latency");
        }

        if let Some(gateway) = &self.route.gateway {
            let endpoint = gateway.endpoint.as_str();
            if let Err(e) = catalog.gateway_calls().inc(&[
                gateway.gateway.as_str(),
                endpoint,
                method,
                status_label.as_str(),
            ]) {
                tracing::warn!(error = %e, gateway = %gateway.gateway, "Failed to record gateway call");
            }
            if let Err(e) = catalog
                .gateway_latency()
                .observe_duration(&[gateway.gateway.as_str(), endpoint, method], elapsed)
            {
                tracing::warn!(error = %e, gateway = %gateway.gateway, "Failed to record gateway latency");
            }
        }

        tracing::trace!(
            method = %method,
            route = %route,
            status = status.as_u16(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Request recorded"
        );
    }
}

/// Middleware that records request count and latency per route template
///
/// Responses pass through unchanged. With metrics disabled the request is
/// forwarded without touching the registry.
pub async fn track_requests(
    State(metrics): State<RequestMetrics>,
    request: Request,
    next: Next,
) -> Response {
    if !metrics.enabled {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let route = metrics.resolver.resolve(&method, request.uri().path());

    let mut guard = RequestGuard {
        metrics,
        method,
        route,
        start,
        status: None,
    };

    let response = next.run(request).await;
    guard.status = Some(response.status());
    response
}
