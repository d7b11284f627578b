//! Dependency health probes
//!
//! A probe answers one question per sampler tick: is this dependency
//! reachable right now. Probes never fail the tick; every failure mode is
//! folded into a [`ProbeOutcome`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::net::TcpStream;

use crate::config::{ProbeConfig, ProbeKind};
use crate::error::{AppError, AppResult};

/// Result of one probe run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Healthy,
    /// Dependency answered (or refused) but is not usable
    Unhealthy,
    /// The probe itself could not complete
    Error(String),
}

impl ProbeOutcome {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Value written to `dependency_up`
    pub fn gauge_value(&self) -> f64 {
        if self.is_healthy() { 1.0 } else { 0.0 }
    }
}

/// Health check for one external dependency
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Value of the `dependency` label
    fn name(&self) -> &str;

    async fn check(&self) -> ProbeOutcome;
}

/// Healthy when a TCP connection to `host:port` opens within the timeout
pub struct TcpProbe {
    name: String,
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(name: impl Into<String>, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DependencyProbe for TcpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProbeOutcome {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_stream)) => ProbeOutcome::Healthy,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                tracing::debug!(probe = %self.name, target = %self.target, "Connection refused");
                ProbeOutcome::Unhealthy
            }
            Ok(Err(e)) => ProbeOutcome::Error(format!("connect to {} failed: {}", self.target, e)),
            Err(_) => {
                tracing::debug!(
                    probe = %self.name,
                    target = %self.target,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Connection timed out"
                );
                ProbeOutcome::Unhealthy
            }
        }
    }
}

/// Healthy when a HEAD request to `url` returns a 2xx status
pub struct HttpProbe {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let name = name.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AppError::Internal(format!("Failed to create HTTP client for probe '{}': {}", name, e))
            })?;

        Ok(Self {
            name,
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl DependencyProbe for HttpProbe {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self) -> ProbeOutcome {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                tracing::debug!(
                    probe = %self.name,
                    url = %self.url,
                    status = %response.status(),
                    healthy,
                    "Probe completed"
                );
                if healthy {
                    ProbeOutcome::Healthy
                } else {
                    ProbeOutcome::Unhealthy
                }
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                tracing::debug!(probe = %self.name, url = %self.url, error = %e, "Probe unreachable");
                ProbeOutcome::Unhealthy
            }
            Err(e) => ProbeOutcome::Error(format!("request to {} failed: {}", self.url, e)),
        }
    }
}

/// Build the probes listed in configuration
pub fn probes_from_config(configs: &[ProbeConfig]) -> AppResult<Vec<Arc<dyn DependencyProbe>>> {
    configs
        .iter()
        .map(|config| {
            let timeout = Duration::from_millis(config.timeout_ms);
            let probe: Arc<dyn DependencyProbe> = match config.kind {
                ProbeKind::Tcp => Arc::new(TcpProbe::new(&config.name, &config.target, timeout)),
                ProbeKind::Http => Arc::new(HttpProbe::new(&config.name, &config.target, timeout)?),
            };
            Ok(probe)
        })
        .collect()
}
