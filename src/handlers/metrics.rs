//! Prometheus metrics endpoint
//!
//! Exposes metrics in Prometheus text format for scraping.

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::handlers::AppState;

/// Metrics handler for Prometheus scraping
///
/// # Response
///
/// - `200 OK` with metrics in Prometheus text format
/// - `500 Internal Server Error` if encoding fails
///
/// # Example
///
/// ```bash
/// curl http://localhost:9090/metrics
/// # HELP app_http_requests_total Total HTTP requests by method, route and status
/// # TYPE app_http_requests_total counter
/// app_http_requests_total{environment="production",method="GET",route="/items/{id}",service="app",status="200"} 42
/// ```
pub async fn handler(State(state): State<AppState>) -> Response {
    match state.registry().encode_text() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            output,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to encode metrics for Prometheus scraping"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to gather metrics: {}", e),
            )
                .into_response()
        }
    }
}
