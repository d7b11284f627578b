//! Background sampler
//!
//! Keeps gauges that no request would ever touch up to date: host CPU,
//! memory and disk usage, dependency reachability and the cache hit ratio
//! derived from `cache_operations_total`. One tokio task runs [`tick`] on a
//! fixed interval; failures are logged, counted in `sampler_errors_total`
//! and never stop the loop.
//!
//! [`tick`]: BackgroundSampler::tick

pub mod probe;
pub mod system;

pub use probe::{DependencyProbe, HttpProbe, ProbeOutcome, TcpProbe, probes_from_config};
pub use system::{ProcSystemSource, SystemSample, SystemSource};

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::AppResult;
use crate::metrics::InstrumentCatalog;

/// Lifecycle of the sampler task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerState {
    /// Waiting for the next tick
    Idle,
    /// A tick is in progress
    Sampling,
    /// The task has ended
    Stopped,
}

/// Everything one tick observed
#[derive(Debug, Clone, Default, Serialize)]
pub struct SampleSnapshot {
    pub system: Option<SystemSample>,
    pub dependencies: BTreeMap<String, ProbeOutcome>,
    pub cache_hit_ratios: BTreeMap<String, f64>,
    /// Stage failures during this tick
    pub errors: u32,
}

/// Hit ratio for a backend; no traffic reads as a perfect ratio
pub fn hit_ratio(hits: f64, misses: f64) -> f64 {
    let total = hits + misses;
    if total <= 0.0 { 1.0 } else { hits / total }
}

/// Shortest interval the sampling loop will run at
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Periodically samples host and dependency state into gauges
pub struct BackgroundSampler {
    catalog: Arc<InstrumentCatalog>,
    system: Arc<dyn SystemSource>,
    probes: Vec<Arc<dyn DependencyProbe>>,
    cache_backends: Vec<String>,
    interval: Duration,
    testing: bool,
    state: RwLock<SamplerState>,
    last: RwLock<Option<SampleSnapshot>>,
    ticks: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl BackgroundSampler {
    /// Intervals shorter than [`MIN_INTERVAL`] are raised to it
    pub fn new(catalog: Arc<InstrumentCatalog>, system: Arc<dyn SystemSource>, interval: Duration) -> Self {
        let (shutdown, _) = watch::channel(false);
        let interval = interval.max(MIN_INTERVAL);
        Self {
            catalog,
            system,
            probes: Vec::new(),
            cache_backends: Vec::new(),
            interval,
            testing: false,
            state: RwLock::new(SamplerState::Idle),
            last: RwLock::new(None),
            ticks: AtomicU64::new(0),
            shutdown,
        }
    }

    /// Build a sampler from configuration using [`ProcSystemSource`]
    pub fn from_config(catalog: Arc<InstrumentCatalog>, config: &Config) -> AppResult<Self> {
        let system = Arc::new(ProcSystemSource::new(config.sampler.disk_path.clone()));
        let probes = probes_from_config(&config.sampler.probes)?;

        Ok(Self::new(
            catalog,
            system,
            Duration::from_secs(config.metrics.scrape_interval_seconds),
        )
        .with_probes(probes)
        .with_cache_backends(config.sampler.cache_backends.clone())
        .with_testing(config.metrics.testing))
    }

    pub fn with_probes(mut self, probes: Vec<Arc<dyn DependencyProbe>>) -> Self {
        self.probes = probes;
        self
    }

    pub fn with_cache_backends(mut self, backends: Vec<String>) -> Self {
        self.cache_backends = backends;
        self
    }

    /// In testing mode [`start`](Self::start) spawns nothing
    pub fn with_testing(mut self, testing: bool) -> Self {
        self.testing = testing;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> SamplerState {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn set_state(&self, next: SamplerState) {
        match self.state.write() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Number of completed ticks
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Snapshot of the most recent completed tick
    pub fn last_snapshot(&self) -> Option<SampleSnapshot> {
        self.last.read().ok().and_then(|last| last.clone())
    }

    fn record_error(&self, stage: &str) {
        if let Err(e) = self.catalog.sampler_errors().inc(&[stage]) {
            tracing::error!(error = %e, stage, "Failed to count sampler error");
        }
    }

    async fn sample_system(&self, snapshot: &mut SampleSnapshot) {
        let sample = match self.system.sample().await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "System resource sampling failed");
                self.record_error("system");
                snapshot.errors += 1;
                return;
            }
        };

        let catalog = &self.catalog;
        let writes = [
            catalog.system_cpu_usage().set(&[], sample.cpu_percent),
            catalog.system_memory_usage().set(&[], sample.memory_percent),
            catalog.system_memory_available().set(&[], sample.memory_available_gb),
            catalog.system_disk_usage().set(&[], sample.disk_percent),
        ];
        for result in writes {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to write system gauge");
                self.record_error("system");
                snapshot.errors += 1;
            }
        }

        snapshot.system = Some(sample);
    }

    async fn run_probes(&self, snapshot: &mut SampleSnapshot) {
        // Each probe runs in its own task so a panic stays contained
        let handles: Vec<_> = self
            .probes
            .iter()
            .map(|probe| {
                let probe = Arc::clone(probe);
                tokio::spawn(async move { probe.check().await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;

        for (probe, result) in self.probes.iter().zip(results) {
            let outcome = result.unwrap_or_else(|e| ProbeOutcome::Error(format!("probe task failed: {}", e)));
            let name = probe.name();

            match &outcome {
                ProbeOutcome::Healthy => {
                    tracing::debug!(dependency = %name, "Dependency healthy");
                }
                ProbeOutcome::Unhealthy => {
                    tracing::warn!(dependency = %name, "Dependency unhealthy");
                }
                ProbeOutcome::Error(reason) => {
                    tracing::warn!(dependency = %name, error = %reason, "Dependency probe failed");
                    self.record_error("probe");
                    snapshot.errors += 1;
                }
            }

            if let Err(e) = self
                .catalog
                .dependency_health()
                .set(&[name], outcome.gauge_value())
            {
                tracing::warn!(error = %e, dependency = %name, "Failed to write dependency gauge");
                self.record_error("probe");
                snapshot.errors += 1;
            }

            snapshot.dependencies.insert(name.to_string(), outcome);
        }
    }

    fn update_cache_ratios(&self, snapshot: &mut SampleSnapshot) {
        let operations = self.catalog.cache_operations();

        for backend in &self.cache_backends {
            let hits = operations.value(&[("backend", backend.as_str()), ("operation", "hit")]);
            let misses = operations.value(&[("backend", backend.as_str()), ("operation", "miss")]);
            let ratio = hit_ratio(hits, misses);

            if let Err(e) = self.catalog.cache_hit_ratio().set(&[backend.as_str()], ratio) {
                tracing::warn!(error = %e, backend = %backend, "Failed to write cache hit ratio");
                self.record_error("cache_ratio");
                snapshot.errors += 1;
                continue;
            }
            snapshot.cache_hit_ratios.insert(backend.clone(), ratio);
        }
    }

    /// Run one sampling cycle
    pub async fn tick(&self) -> SampleSnapshot {
        self.set_state(SamplerState::Sampling);
        let started = Instant::now();
        let mut snapshot = SampleSnapshot::default();

        self.sample_system(&mut snapshot).await;
        self.run_probes(&mut snapshot).await;
        self.update_cache_ratios(&mut snapshot);

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            dependencies = snapshot.dependencies.len(),
            errors = snapshot.errors,
            "Sampler tick completed"
        );

        if let Ok(mut last) = self.last.write() {
            *last = Some(snapshot.clone());
        }
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.set_state(SamplerState::Idle);
        snapshot
    }

    /// Run one tick, containing any panic it raises
    ///
    /// A panic is logged, counted as `sampler_errors_total{stage="tick"}` and
    /// leaves the sampler `Idle`. Returns `None` in that case.
    pub async fn tick_isolated(&self) -> Option<SampleSnapshot> {
        match AssertUnwindSafe(self.tick()).catch_unwind().await {
            Ok(snapshot) => Some(snapshot),
            Err(payload) => {
                tracing::error!(panic = %panic_message(payload.as_ref()), "Sampler tick panicked");
                self.record_error("tick");
                self.set_state(SamplerState::Idle);
                None
            }
        }
    }

    /// Ask a sampler task to finish after its current tick
    ///
    /// Also applies when called before [`start`](Self::start).
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Spawn the sampling loop
    ///
    /// Returns `None` in testing mode. The returned handle resolves once the
    /// loop has ended, after [`shutdown`](Self::shutdown) or a panic.
    pub fn start(self: Arc<Self>) -> Option<JoinHandle<()>> {
        if self.testing {
            tracing::info!("Testing mode enabled, background sampler not started");
            return None;
        }

        let sampler = Arc::clone(&self);
        let mut shutdown = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            tracing::info!(
                interval_secs = sampler.interval.as_secs(),
                probes = sampler.probes.len(),
                cache_backends = sampler.cache_backends.len(),
                "Starting background sampler"
            );

            if *shutdown.borrow_and_update() {
                tracing::info!("Background sampler shut down before its first tick");
                return;
            }

            let mut interval = tokio::time::interval(sampler.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sampler.tick_isolated().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Background sampler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        // Monitor the sampler task so its end is always visible
        Some(tokio::spawn(async move {
            match handle.await {
                Ok(()) => {
                    tracing::info!("Background sampler stopped");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Background sampler task panicked. System and dependency gauges \
                        will keep their last values until restart."
                    );
                }
            }
            self.set_state(SamplerState::Stopped);
        }))
    }
}
