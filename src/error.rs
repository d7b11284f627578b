//! Error types for reqmeter
//!
//! `AppError` covers configuration and server failures and implements
//! `IntoResponse` for Axum handlers. `MetricsError` covers the instrument
//! registry and catalog.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::metrics::InstrumentKind;

/// Errors raised by the metric registry and typed instrument handles
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Same instrument name requested with an incompatible kind or label schema.
    ///
    /// Fatal at startup: catalog registration aborts instead of letting two
    /// inconsistent series coexist.
    #[error(
        "Schema conflict for metric '{name}': registered as {existing_kind:?} {existing_labels:?}, \
        requested as {requested_kind:?} {requested_labels:?}"
    )]
    SchemaConflict {
        name: String,
        existing_kind: InstrumentKind,
        existing_labels: Vec<String>,
        requested_kind: InstrumentKind,
        requested_labels: Vec<String>,
    },

    #[error("Label mismatch for metric '{name}': {reason}")]
    LabelMismatch { name: String, reason: String },

    #[error("Invalid observation for metric '{name}': {value} (must be finite and non-negative)")]
    InvalidObservation { name: String, value: f64 },

    #[error("Invalid metric definition '{name}': {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Metric registry lock poisoned: {0}")]
    LockPoisoned(String),

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
}

/// Errors raised while sampling host resources
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("statvfs failed for '{path}': {source}")]
    Statvfs {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sampling task failed: {0}")]
    Task(String),
}

/// Main error type for the application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigFileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ConfigParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigValidationFailed { path: String, reason: String },

    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Self::ConfigFileRead { .. }
            | Self::ConfigParseFailed { .. }
            | Self::ConfigValidationFailed { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            Self::Metrics(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results
pub type AppResult<T> = Result<T, AppError>;
