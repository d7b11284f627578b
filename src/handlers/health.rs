//! Health check endpoint
//!
//! Reports the background sampler's state and the dependency outcomes of its
//! most recent tick.

use std::collections::BTreeMap;

use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;

use crate::handlers::AppState;
use crate::sampler::{ProbeOutcome, SamplerState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: &'static str,
    pub metrics_enabled: bool,
    pub sampler: SamplerState,
    pub sampler_ticks: u64,
    /// Requests recorded across all routes
    pub requests_recorded: f64,
    /// "operational" when every probed dependency was healthy on the last
    /// tick, "degraded" otherwise
    pub dependencies_status: &'static str,
    pub dependencies: BTreeMap<String, ProbeOutcome>,
}

/// Health check handler
///
/// Always answers 200 while the process serves requests; dependency
/// problems show up as `dependencies_status = "degraded"`.
pub async fn handler(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let sampler = state.sampler();
    let dependencies = sampler
        .last_snapshot()
        .map(|snapshot| snapshot.dependencies)
        .unwrap_or_default();

    let dependencies_status = if dependencies.values().all(ProbeOutcome::is_healthy) {
        "operational"
    } else {
        "degraded"
    };

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "OK",
            metrics_enabled: state.config().metrics.enabled,
            sampler: sampler.state(),
            sampler_ticks: sampler.ticks(),
            requests_recorded: state.catalog().request_count().total(&[]),
            dependencies_status,
            dependencies,
        }),
    )
}
