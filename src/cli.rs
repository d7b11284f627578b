//! Command-line interface for reqmeter
//!
//! Provides argument parsing and subcommand handling for the reqmeter binary.

use clap::{Parser, Subcommand};

/// Request, system and dependency-health metrics for axum services
#[derive(Parser)]
#[command(name = "reqmeter")]
#[command(version)]
#[command(about = "Request, system and dependency-health metrics for axum services")]
#[command(
    long_about = "reqmeter serves an instrumented HTTP application: every request is counted \
    and timed under its route template, a background sampler tracks host resources and \
    dependency health, and everything is exposed on /metrics for Prometheus."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate a configuration file and exit
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# reqmeter Configuration
# ======================
#
# This file configures the HTTP server, metrics exposition, the background
# sampler and observability settings for reqmeter.
#
# Environment overrides (applied once at startup):
#   PROMETHEUS_ENABLED  true/false
#   PROMETHEUS_PORT     scrape listener port
#   TESTING             true disables the background sampler

# ─────────────────────────────────────────────────────────────────────────────
# SERVER CONFIGURATION
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"

# Port to listen on
port = 3000

# ─────────────────────────────────────────────────────────────────────────────
# METRICS
# ─────────────────────────────────────────────────────────────────────────────

[metrics]
enabled = true

# Same value as server.port serves /metrics on the application listener
port = 9090

# Prepended to every metric name: lowercase, ends with an underscore
prefix = "app_"

# Background sampler interval
scrape_interval_seconds = 15

# Upper bound on remembered (method, path) resolutions
route_cache_capacity = 1024

# Attached to every series. service and environment are required.
[metrics.default_labels]
service = "app"
environment = "production"

# Gateway namespaces: keep only `depth` segments after the prefix
[[metrics.gateways]]
prefix = "/vapi"
depth = 1

[[metrics.gateways]]
prefix = "/stripe"
depth = 1

# ─────────────────────────────────────────────────────────────────────────────
# SAMPLER
# ─────────────────────────────────────────────────────────────────────────────

[sampler]
# Filesystem reported by system_disk_usage_percent
disk_path = "/"

# Backends with a derived cache_hit_ratio gauge
cache_backends = ["valkey"]

# Dependency probes: kind = "tcp" (host:port) or "http" (HEAD, 2xx = healthy)
# [[sampler.probes]]
# name = "pulsar"
# kind = "tcp"
# target = "localhost:6650"
# timeout_ms = 2000

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# trace, debug, info, warn, error (RUST_LOG takes precedence)
log_level = "info"
"#
}
