//! Configuration management for reqmeter
//!
//! Parses TOML configuration files and provides typed access to settings.
//! Configuration is read once at startup and treated as immutable afterwards.

use crate::metrics::RESERVED_LABEL_NAMES;
use crate::router::{CollapseRule, collapse};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// Whether `name` is a usable Prometheus label name
///
/// `[a-zA-Z_][a-zA-Z0-9_]*`, without the `__` prefix Prometheus keeps for itself.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with("__")
}

/// Default labels every configuration must carry
pub const REQUIRED_DEFAULT_LABELS: &[&str] = &["service", "environment"];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Metrics configuration
///
/// `port` equal to `server.port` serves `/metrics` on the application
/// listener; any other value starts a dedicated scrape listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_scrape_interval")]
    pub scrape_interval_seconds: u64,
    #[serde(default = "default_labels")]
    pub default_labels: HashMap<String, String>,
    /// Suppresses the background sampler entirely
    #[serde(default)]
    pub testing: bool,
    #[serde(default = "default_route_cache_capacity")]
    pub route_cache_capacity: usize,
    #[serde(default = "collapse::default_rules")]
    pub gateways: Vec<CollapseRule>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            port: default_metrics_port(),
            prefix: default_prefix(),
            scrape_interval_seconds: default_scrape_interval(),
            default_labels: default_labels(),
            testing: false,
            route_cache_capacity: default_route_cache_capacity(),
            gateways: collapse::default_rules(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_prefix() -> String {
    "app_".to_string()
}

fn default_scrape_interval() -> u64 {
    15
}

fn default_labels() -> HashMap<String, String> {
    HashMap::from([
        ("service".to_string(), "app".to_string()),
        ("environment".to_string(), "production".to_string()),
    ])
}

fn default_route_cache_capacity() -> usize {
    crate::router::DEFAULT_CACHE_CAPACITY
}

/// Background sampler configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SamplerConfig {
    /// Filesystem whose usage feeds the disk gauge
    #[serde(default = "default_disk_path")]
    pub disk_path: String,
    /// Backends whose hit ratio is derived from `cache_operations_total`
    #[serde(default = "default_cache_backends")]
    pub cache_backends: Vec<String>,
    #[serde(default)]
    pub probes: Vec<ProbeConfig>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            disk_path: default_disk_path(),
            cache_backends: default_cache_backends(),
            probes: Vec::new(),
        }
    }
}

fn default_disk_path() -> String {
    "/".to_string()
}

fn default_cache_backends() -> Vec<String> {
    vec!["valkey".to_string()]
}

/// Probe kind
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// TCP connect to `host:port`
    Tcp,
    /// HTTP HEAD, healthy on any 2xx
    Http,
}

/// One dependency health probe
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    pub name: String,
    pub kind: ProbeKind,
    pub target: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

/// Observability configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn parse_bool(name: &str, value: &str) -> crate::error::AppResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(crate::error::AppError::Config(format!(
            "Environment variable {} has invalid boolean value '{}'",
            name, other
        ))),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::AppResult<Self> {
        let path_display = path.as_ref().display().to_string();

        // Phase 1: Read file (preserves io::Error context)
        let content = std::fs::read_to_string(path.as_ref()).map_err(|source| {
            crate::error::AppError::ConfigFileRead {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 2: Parse TOML (preserves toml::de::Error context)
        let config: Self = toml::from_str(&content).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: path_display.clone(),
                source,
            }
        })?;

        // Phase 3: Validate parsed config (provides contextual reason)
        config
            .validate()
            .map_err(|e| crate::error::AppError::ConfigValidationFailed {
                path: path_display,
                reason: e.to_string(),
            })?;

        Ok(config)
    }

    /// Apply `PROMETHEUS_ENABLED`, `PROMETHEUS_PORT` and `TESTING` from the
    /// process environment
    pub fn apply_env_overrides(&mut self) -> crate::error::AppResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> crate::error::AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PROMETHEUS_ENABLED") {
            self.metrics.enabled = parse_bool("PROMETHEUS_ENABLED", &value)?;
            tracing::debug!(enabled = self.metrics.enabled, "PROMETHEUS_ENABLED override applied");
        }

        if let Some(value) = lookup("PROMETHEUS_PORT") {
            self.metrics.port = value.trim().parse::<u16>().map_err(|e| {
                crate::error::AppError::Config(format!(
                    "Environment variable PROMETHEUS_PORT has invalid value '{}': {}",
                    value, e
                ))
            })?;
            tracing::debug!(port = self.metrics.port, "PROMETHEUS_PORT override applied");
        }

        if let Some(value) = lookup("TESTING") {
            self.metrics.testing = parse_bool("TESTING", &value)?;
        }

        self.validate()
    }

    /// Whether `/metrics` shares the application listener
    pub fn metrics_on_app_port(&self) -> bool {
        self.metrics.port == self.server.port
    }

    /// Validate configuration after parsing
    ///
    /// This is called automatically by `from_file()`, but can also be called
    /// explicitly when constructing Config via other means (e.g., in tests).
    pub fn validate(&self) -> crate::error::AppResult<()> {
        let metrics = &self.metrics;

        // Prefix conventions: non-empty, lowercase, underscore-terminated
        if metrics.prefix.is_empty() {
            return Err(crate::error::AppError::Config(
                "Configuration error: metrics.prefix cannot be empty".to_string(),
            ));
        }
        if metrics.prefix != metrics.prefix.to_lowercase() {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: metrics.prefix '{}' must be lowercase",
                metrics.prefix
            )));
        }
        if !metrics.prefix.ends_with('_') {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: metrics.prefix '{}' must end with an underscore",
                metrics.prefix
            )));
        }
        if metrics.prefix.starts_with(|c: char| c.is_ascii_digit())
            || !metrics
                .prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: metrics.prefix '{}' may only contain [a-z0-9_] \
                and must not start with a digit",
                metrics.prefix
            )));
        }

        for required in REQUIRED_DEFAULT_LABELS {
            if !metrics.default_labels.contains_key(*required) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: metrics.default_labels is missing required label '{}'. \
                    Required labels: {:?}",
                    required, REQUIRED_DEFAULT_LABELS
                )));
            }
        }

        let mut label_names: Vec<&String> = metrics.default_labels.keys().collect();
        label_names.sort();
        for name in label_names {
            if !is_valid_label_name(name) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: metrics.default_labels key '{}' is not a valid label name \
                    (expected [a-zA-Z_][a-zA-Z0-9_]* without a leading '__')",
                    name
                )));
            }
            if RESERVED_LABEL_NAMES.contains(&name.as_str()) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: metrics.default_labels key '{}' collides with an instrument \
                    label. Reserved names: {:?}",
                    name, RESERVED_LABEL_NAMES
                )));
            }
        }

        if metrics.scrape_interval_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "Configuration error: metrics.scrape_interval_seconds must be greater than 0"
                    .to_string(),
            ));
        }
        if metrics.scrape_interval_seconds > 3600 {
            return Err(crate::error::AppError::Config(format!(
                "Configuration error: metrics.scrape_interval_seconds cannot exceed 3600 seconds, got {}",
                metrics.scrape_interval_seconds
            )));
        }

        if metrics.port == 0 {
            return Err(crate::error::AppError::Config(
                "Configuration error: metrics.port must be greater than 0".to_string(),
            ));
        }

        for rule in &metrics.gateways {
            if !rule.prefix.starts_with('/') || rule.prefix.trim_end_matches('/').is_empty() {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: gateway prefix '{}' must start with '/' and name a namespace",
                    rule.prefix
                )));
            }
            if rule.depth == 0 {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: gateway '{}' has depth 0; depth must be at least 1",
                    rule.prefix
                )));
            }
        }

        if self.sampler.cache_backends.iter().any(|b| b.trim().is_empty()) {
            return Err(crate::error::AppError::Config(
                "Configuration error: sampler.cache_backends cannot contain empty names".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for probe in &self.sampler.probes {
            if probe.name.trim().is_empty() {
                return Err(crate::error::AppError::Config(
                    "Configuration error: sampler probe name cannot be empty".to_string(),
                ));
            }
            if !seen.insert(probe.name.as_str()) {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: duplicate sampler probe name '{}'",
                    probe.name
                )));
            }
            if probe.timeout_ms == 0 {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: probe '{}' has timeout_ms=0",
                    probe.name
                )));
            }
            let target_ok = match probe.kind {
                ProbeKind::Http => {
                    probe.target.starts_with("http://") || probe.target.starts_with("https://")
                }
                ProbeKind::Tcp => probe
                    .target
                    .rsplit_once(':')
                    .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok()),
            };
            if !target_ok {
                return Err(crate::error::AppError::Config(format!(
                    "Configuration error: probe '{}' has invalid target '{}' for kind {:?}. \
                    http probes need an http(s):// URL, tcp probes need host:port.",
                    probe.name, probe.target, probe.kind
                )));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = crate::error::AppError;

    fn from_str(toml_str: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(toml_str).map_err(|source| {
            crate::error::AppError::ConfigParseFailed {
                path: "<string>".to_string(),
                source,
            }
        })?;

        // Validate config before returning
        config.validate()?;
        Ok(config)
    }
}
