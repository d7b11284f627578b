//! HTTP request handlers for reqmeter

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::{InstrumentCatalog, MetricRegistry};
use crate::middleware::RequestMetrics;
use crate::router::RouteResolver;
use crate::sampler::BackgroundSampler;
use std::sync::Arc;

pub mod health;
pub mod metrics;

/// Application state shared across all handlers
///
/// Contains configuration, the instrument catalog and the background sampler.
/// All fields are Arc'd for cheap cloning across Axum handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    catalog: Arc<InstrumentCatalog>,
    sampler: Arc<BackgroundSampler>,
}

impl AppState {
    /// Create a new AppState from configuration
    ///
    /// Builds a fresh registry and registers the full instrument catalog on
    /// it.
    ///
    /// # Errors
    ///
    /// Fails when catalog registration hits a schema conflict or a
    /// configured probe cannot be built. Both are fatal at startup.
    pub fn new(config: Arc<Config>) -> AppResult<Self> {
        let registry = Arc::new(MetricRegistry::from_config(&config.metrics));
        let catalog = Arc::new(InstrumentCatalog::register(registry)?);
        let sampler = Arc::new(BackgroundSampler::from_config(Arc::clone(&catalog), &config)?);

        Ok(Self::from_parts(config, catalog, sampler))
    }

    /// Assemble state from already-built parts
    pub fn from_parts(
        config: Arc<Config>,
        catalog: Arc<InstrumentCatalog>,
        sampler: Arc<BackgroundSampler>,
    ) -> Self {
        Self {
            config,
            catalog,
            sampler,
        }
    }

    /// Get reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<InstrumentCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &MetricRegistry {
        self.catalog.registry()
    }

    pub fn sampler(&self) -> &Arc<BackgroundSampler> {
        &self.sampler
    }

    /// Middleware state for request instrumentation over `resolver`
    pub fn request_metrics(&self, resolver: Arc<RouteResolver>) -> RequestMetrics {
        RequestMetrics::new(Arc::clone(&self.catalog), resolver, self.config.metrics.enabled)
    }
}
