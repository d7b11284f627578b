//! Axum middleware

pub mod request_metrics;

pub use request_metrics::{RequestMetrics, track_requests};
