//! reqmeter - request, system and dependency-health metrics for axum services
//!
//! Measures every inbound request under its route template, keeps host and
//! dependency gauges fresh from a background sampler, and exposes everything
//! in Prometheus text format.

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod router;
pub mod sampler;
pub mod telemetry;
