//! Typed instrument catalog
//!
//! Every semantic metric of the service is registered here, once, with a
//! fixed name and label schema. Call sites only ever see the typed handles,
//! so no code outside this module constructs instruments.
//!
//! Label values for request metrics come from route templates (see
//! `crate::router`), never from raw paths, which keeps cardinality bounded.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{CounterVec, GaugeVec, HistogramVec};

use super::readback;
use super::registry::{Collectors, Instrument, InstrumentSpec, MetricRegistry};
use crate::error::MetricsError;

/// Every label name used by a catalog instrument, plus the names the
/// exposition format reserves for histogram and summary series
pub const RESERVED_LABEL_NAMES: &[&str] = &[
    "method",
    "route",
    "status",
    "gateway",
    "endpoint",
    "task_name",
    "backend",
    "operation",
    "dependency",
    "event_type",
    "stage",
    "le",
    "quantile",
];

/// Cache operation label values
///
/// Restricts the `operation` label of `cache_operations_total` to a fixed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperation {
    Hit,
    Miss,
    Set,
    Delete,
    Error,
}

impl CacheOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Error => "error",
        }
    }
}

fn wrong_kind(instrument: &Instrument, wanted: &str) -> MetricsError {
    MetricsError::InvalidDefinition {
        name: instrument.name().to_string(),
        reason: format!("expected a {}, registered as {}", wanted, instrument.kind().as_str()),
    }
}

/// Counter handle
#[derive(Clone)]
pub struct CounterHandle {
    instrument: Instrument,
    vec: CounterVec,
}

impl CounterHandle {
    pub fn from_instrument(instrument: Instrument) -> Result<Self, MetricsError> {
        let vec = match instrument.collectors() {
            Collectors::Counter(vec) => vec.clone(),
            _ => return Err(wrong_kind(&instrument, "counter")),
        };
        Ok(Self { instrument, vec })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn inc(&self, labels: &[&str]) -> Result<(), MetricsError> {
        self.inc_by(labels, 1.0)
    }

    pub fn inc_by(&self, labels: &[&str], amount: f64) -> Result<(), MetricsError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(MetricsError::InvalidObservation {
                name: self.instrument.name().to_string(),
                value: amount,
            });
        }
        self.instrument.check_arity(labels)?;
        self.vec.get_metric_with_label_values(labels)?.inc_by(amount);
        Ok(())
    }

    /// Current value of one series (0.0 when it does not exist yet)
    pub fn value(&self, labels: &[(&str, &str)]) -> f64 {
        readback::read_value(&self.instrument, labels)
    }

    /// Sum over every series matching `labels`
    pub fn total(&self, labels: &[(&str, &str)]) -> f64 {
        readback::sum_values(&self.instrument, labels)
    }
}

/// Histogram handle
#[derive(Clone)]
pub struct HistogramHandle {
    instrument: Instrument,
    vec: HistogramVec,
}

impl HistogramHandle {
    pub fn from_instrument(instrument: Instrument) -> Result<Self, MetricsError> {
        let vec = match instrument.collectors() {
            Collectors::Histogram(vec) => vec.clone(),
            _ => return Err(wrong_kind(&instrument, "histogram")),
        };
        Ok(Self { instrument, vec })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Record one observation
    ///
    /// NaN, infinite and negative values are rejected: they would corrupt
    /// every percentile derived from the histogram.
    pub fn observe(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() || value < 0.0 {
            return Err(MetricsError::InvalidObservation {
                name: self.instrument.name().to_string(),
                value,
            });
        }
        self.instrument.check_arity(labels)?;
        self.vec.get_metric_with_label_values(labels)?.observe(value);
        Ok(())
    }

    pub fn observe_duration(&self, labels: &[&str], elapsed: Duration) -> Result<(), MetricsError> {
        self.observe(labels, elapsed.as_secs_f64())
    }

    /// Observation count of one series
    pub fn count(&self, labels: &[(&str, &str)]) -> u64 {
        readback::read_value(&self.instrument, labels) as u64
    }
}

/// Gauge handle
#[derive(Clone)]
pub struct GaugeHandle {
    instrument: Instrument,
    vec: GaugeVec,
}

impl GaugeHandle {
    pub fn from_instrument(instrument: Instrument) -> Result<Self, MetricsError> {
        let vec = match instrument.collectors() {
            Collectors::Gauge(vec) => vec.clone(),
            _ => return Err(wrong_kind(&instrument, "gauge")),
        };
        Ok(Self { instrument, vec })
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn set(&self, labels: &[&str], value: f64) -> Result<(), MetricsError> {
        if !value.is_finite() {
            return Err(MetricsError::InvalidObservation {
                name: self.instrument.name().to_string(),
                value,
            });
        }
        self.instrument.check_arity(labels)?;
        self.vec.get_metric_with_label_values(labels)?.set(value);
        Ok(())
    }

    pub fn value(&self, labels: &[(&str, &str)]) -> f64 {
        readback::read_value(&self.instrument, labels)
    }
}

/// Typed handles for every metric the service exports
#[derive(Clone)]
pub struct InstrumentCatalog {
    registry: Arc<MetricRegistry>,
    request_count: CounterHandle,
    request_latency: HistogramHandle,
    gateway_calls: CounterHandle,
    gateway_latency: HistogramHandle,
    task_count: CounterHandle,
    task_latency: HistogramHandle,
    cache_operations: CounterHandle,
    cache_hit_ratio: GaugeHandle,
    system_cpu_usage: GaugeHandle,
    system_memory_usage: GaugeHandle,
    system_memory_available: GaugeHandle,
    system_disk_usage: GaugeHandle,
    dependency_health: GaugeHandle,
    db_operations: CounterHandle,
    db_latency: HistogramHandle,
    event_count: CounterHandle,
    event_latency: HistogramHandle,
    sampler_errors: CounterHandle,
}

impl InstrumentCatalog {
    /// Register the full catalog on `registry`
    ///
    /// Registering twice on the same registry returns handles to the same
    /// instruments.
    ///
    /// # Errors
    ///
    /// Fails with `SchemaConflict` if any catalog name was already registered
    /// with a different schema. Callers treat this as fatal at startup.
    pub fn register(registry: Arc<MetricRegistry>) -> Result<Self, MetricsError> {
        let counter = |spec: InstrumentSpec| {
            registry
                .get_or_create(spec)
                .and_then(CounterHandle::from_instrument)
        };
        let histogram = |spec: InstrumentSpec| {
            registry
                .get_or_create(spec)
                .and_then(HistogramHandle::from_instrument)
        };
        let gauge = |spec: InstrumentSpec| {
            registry
                .get_or_create(spec)
                .and_then(GaugeHandle::from_instrument)
        };

        // Request metrics: route is always a template, status always populated
        let request_count = counter(
            InstrumentSpec::counter("http_requests_total", "Total HTTP requests by method, route and status")
                .labels(&["method", "route", "status"]),
        )?;
        let request_latency = histogram(
            InstrumentSpec::histogram(
                "http_request_duration_seconds",
                "HTTP request latency in seconds by method, route and status",
            )
            .labels(&["method", "route", "status"]),
        )?;

        // Gateway namespaces: one series per collapsed endpoint
        let gateway_calls = counter(
            InstrumentSpec::counter("gateway_calls_total", "Calls to gateway namespaces by endpoint")
                .labels(&["gateway", "endpoint", "method", "status"]),
        )?;
        let gateway_latency = histogram(
            InstrumentSpec::histogram(
                "gateway_request_duration_seconds",
                "Gateway request latency in seconds by endpoint",
            )
            .labels(&["gateway", "endpoint", "method"]),
        )?;

        let task_count = counter(
            InstrumentSpec::counter("tasks_total", "Total background tasks executed")
                .labels(&["task_name", "status"]),
        )?;
        let task_latency = histogram(
            InstrumentSpec::histogram("task_duration_seconds", "Background task execution time")
                .labels(&["task_name"])
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        )?;

        // Cardinality: backends x 5 operations
        let cache_operations = counter(
            InstrumentSpec::counter("cache_operations_total", "Cache operations by backend and operation")
                .labels(&["backend", "operation"]),
        )?;
        let cache_hit_ratio = gauge(
            InstrumentSpec::gauge("cache_hit_ratio", "Cache hit ratio (hits / (hits + misses)) by backend")
                .labels(&["backend"]),
        )?;

        let system_cpu_usage = gauge(InstrumentSpec::gauge(
            "system_cpu_usage_percent",
            "System CPU usage percentage",
        ))?;
        let system_memory_usage = gauge(InstrumentSpec::gauge(
            "system_memory_usage_percent",
            "System memory usage percentage",
        ))?;
        let system_memory_available = gauge(InstrumentSpec::gauge(
            "system_memory_available_gigabytes",
            "Available system memory in gigabytes",
        ))?;
        let system_disk_usage = gauge(InstrumentSpec::gauge(
            "system_disk_usage_percent",
            "Disk usage percentage of the sampled filesystem",
        ))?;

        let dependency_health = gauge(
            InstrumentSpec::gauge("dependency_up", "Dependency health (1 = healthy, 0 = unhealthy)")
                .labels(&["dependency"]),
        )?;

        let db_operations = counter(
            InstrumentSpec::counter("db_operations_total", "Database operations by operation and status")
                .labels(&["operation", "status"]),
        )?;
        let db_latency = histogram(
            InstrumentSpec::histogram("db_operation_duration_seconds", "Database operation latency")
                .labels(&["operation"]),
        )?;

        let event_count = counter(
            InstrumentSpec::counter("events_total", "Events processed by type and status")
                .labels(&["event_type", "status"]),
        )?;
        let event_latency = histogram(
            InstrumentSpec::histogram("event_duration_seconds", "Event processing latency")
                .labels(&["event_type"]),
        )?;

        // Alert on any sustained increase: the sampler is degraded
        let sampler_errors = counter(
            InstrumentSpec::counter(
                "sampler_errors_total",
                "Background sampler failures by stage (system, probe, cache_ratio, tick)",
            )
            .labels(&["stage"]),
        )?;

        Ok(Self {
            registry,
            request_count,
            request_latency,
            gateway_calls,
            gateway_latency,
            task_count,
            task_latency,
            cache_operations,
            cache_hit_ratio,
            system_cpu_usage,
            system_memory_usage,
            system_memory_available,
            system_disk_usage,
            dependency_health,
            db_operations,
            db_latency,
            event_count,
            event_latency,
            sampler_errors,
        })
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn request_count(&self) -> &CounterHandle {
        &self.request_count
    }

    pub fn request_latency(&self) -> &HistogramHandle {
        &self.request_latency
    }

    pub fn gateway_calls(&self) -> &CounterHandle {
        &self.gateway_calls
    }

    pub fn gateway_latency(&self) -> &HistogramHandle {
        &self.gateway_latency
    }

    pub fn task_count(&self) -> &CounterHandle {
        &self.task_count
    }

    pub fn task_latency(&self) -> &HistogramHandle {
        &self.task_latency
    }

    pub fn cache_operations(&self) -> &CounterHandle {
        &self.cache_operations
    }

    pub fn cache_hit_ratio(&self) -> &GaugeHandle {
        &self.cache_hit_ratio
    }

    pub fn system_cpu_usage(&self) -> &GaugeHandle {
        &self.system_cpu_usage
    }

    pub fn system_memory_usage(&self) -> &GaugeHandle {
        &self.system_memory_usage
    }

    pub fn system_memory_available(&self) -> &GaugeHandle {
        &self.system_memory_available
    }

    pub fn system_disk_usage(&self) -> &GaugeHandle {
        &self.system_disk_usage
    }

    pub fn dependency_health(&self) -> &GaugeHandle {
        &self.dependency_health
    }

    pub fn db_operations(&self) -> &CounterHandle {
        &self.db_operations
    }

    pub fn db_latency(&self) -> &HistogramHandle {
        &self.db_latency
    }

    pub fn event_count(&self) -> &CounterHandle {
        &self.event_count
    }

    pub fn event_latency(&self) -> &HistogramHandle {
        &self.event_latency
    }

    pub fn sampler_errors(&self) -> &CounterHandle {
        &self.sampler_errors
    }

    /// Record one cache operation for `backend`
    pub fn record_cache(&self, backend: &str, operation: CacheOperation) -> Result<(), MetricsError> {
        self.cache_operations.inc(&[backend, operation.as_str()])
    }

    /// Record a finished background task
    pub fn record_task(&self, task_name: &str, status: &str, elapsed: Duration) -> Result<(), MetricsError> {
        self.task_count.inc(&[task_name, status])?;
        self.task_latency.observe_duration(&[task_name], elapsed)
    }

    /// Record a finished database operation
    pub fn record_db_operation(
        &self,
        operation: &str,
        status: &str,
        elapsed: Duration,
    ) -> Result<(), MetricsError> {
        self.db_operations.inc(&[operation, status])?;
        self.db_latency.observe_duration(&[operation], elapsed)
    }

    /// Record a processed event
    pub fn record_event(&self, event_type: &str, status: &str, elapsed: Duration) -> Result<(), MetricsError> {
        self.event_count.inc(&[event_type, status])?;
        self.event_latency.observe_duration(&[event_type], elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::registry::InstrumentKind;
    use std::collections::HashMap;
    use std::thread;

    fn catalog() -> InstrumentCatalog {
        let registry = Arc::new(MetricRegistry::new("svc_", HashMap::new()));
        InstrumentCatalog::register(registry).expect("catalog should register")
    }

    #[test]
    fn test_register_twice_returns_same_instruments() {
        let registry = Arc::new(MetricRegistry::new("svc_", HashMap::new()));
        let first = InstrumentCatalog::register(Arc::clone(&registry)).unwrap();
        let second = InstrumentCatalog::register(Arc::clone(&registry)).unwrap();

        assert!(
            first
                .request_count()
                .instrument()
                .same_as(second.request_count().instrument())
        );
        assert!(
            first
                .cache_hit_ratio()
                .instrument()
                .same_as(second.cache_hit_ratio().instrument())
        );
        assert_eq!(registry.instruments().len(), 18);
    }

    #[test]
    fn test_register_fails_on_conflicting_preexisting_schema() {
        let registry = Arc::new(MetricRegistry::new("svc_", HashMap::new()));
        registry
            .get_or_create(InstrumentSpec::gauge("http_requests_total", "wrong kind"))
            .unwrap();

        let result = InstrumentCatalog::register(registry);
        assert!(matches!(result, Err(MetricsError::SchemaConflict { .. })));
    }

    #[test]
    fn test_reserved_names_cover_every_instrument_label() {
        let catalog = catalog();
        for instrument in catalog.registry().instruments() {
            for label in instrument.label_names() {
                assert!(
                    RESERVED_LABEL_NAMES.contains(&label.as_str()),
                    "{} uses unreserved label {}",
                    instrument.name(),
                    label
                );
            }
        }
    }

    #[test]
    fn test_catalog_schema_is_inspectable() {
        let catalog = catalog();
        let names: Vec<(String, InstrumentKind)> = catalog
            .registry()
            .instruments()
            .iter()
            .map(|i| (i.name().to_string(), i.kind()))
            .collect();

        assert!(names.contains(&("svc_http_requests_total".to_string(), InstrumentKind::Counter)));
        assert!(names.contains(&(
            "svc_http_request_duration_seconds".to_string(),
            InstrumentKind::Histogram
        )));
        assert!(names.contains(&("svc_cache_hit_ratio".to_string(), InstrumentKind::Gauge)));
        assert_eq!(
            catalog.request_count().instrument().label_names(),
            &["method".to_string(), "route".to_string(), "status".to_string()]
        );
    }

    #[test]
    fn test_counter_rejects_wrong_arity() {
        let catalog = catalog();
        let err = catalog
            .request_count()
            .inc(&["GET", "/items/{id}"])
            .expect_err("two values for a three-label schema");
        assert!(matches!(err, MetricsError::LabelMismatch { .. }));
    }

    #[test]
    fn test_histogram_rejects_nan_and_negative() {
        let catalog = catalog();
        let latency = catalog.request_latency();
        assert!(latency.observe(&["GET", "/", "200"], f64::NAN).is_err());
        assert!(latency.observe(&["GET", "/", "200"], f64::INFINITY).is_err());
        assert!(latency.observe(&["GET", "/", "200"], -0.5).is_err());
        assert!(latency.observe(&["GET", "/", "200"], 0.0).is_ok());
        assert_eq!(latency.count(&[("route", "/")]), 1);
    }

    #[test]
    fn test_record_cache_counts_per_backend() {
        let catalog = catalog();
        for _ in 0..3 {
            catalog.record_cache("valkey", CacheOperation::Hit).unwrap();
        }
        catalog.record_cache("valkey", CacheOperation::Miss).unwrap();
        catalog.record_cache("pulsar", CacheOperation::Hit).unwrap();

        let cache = catalog.cache_operations();
        assert_eq!(cache.value(&[("backend", "valkey"), ("operation", "hit")]), 3.0);
        assert_eq!(cache.value(&[("backend", "valkey"), ("operation", "miss")]), 1.0);
        assert_eq!(cache.value(&[("backend", "pulsar"), ("operation", "hit")]), 1.0);
    }

    #[test]
    fn test_record_task_db_and_event_helpers() {
        let catalog = catalog();
        catalog
            .record_task("send_email", "success", Duration::from_millis(20))
            .unwrap();
        catalog
            .record_db_operation("select", "ok", Duration::from_millis(3))
            .unwrap();
        catalog
            .record_event("user.created", "ok", Duration::from_millis(1))
            .unwrap();

        assert_eq!(catalog.task_count().value(&[("task_name", "send_email")]), 1.0);
        assert_eq!(catalog.task_latency().count(&[("task_name", "send_email")]), 1);
        assert_eq!(catalog.db_operations().value(&[("operation", "select")]), 1.0);
        assert_eq!(catalog.db_latency().count(&[("operation", "select")]), 1);
        assert_eq!(catalog.event_count().value(&[("event_type", "user.created")]), 1.0);
        assert_eq!(catalog.event_latency().count(&[("event_type", "user.created")]), 1);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let catalog = Arc::new(catalog());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&catalog);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        c.request_count()
                            .inc(&["GET", "/items/{id}", "200"])
                            .expect("increment should succeed");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("thread should not panic");
        }

        assert_eq!(
            catalog
                .request_count()
                .value(&[("method", "GET"), ("route", "/items/{id}"), ("status", "200")]),
            8000.0
        );
    }

    #[test]
    fn test_gauge_rejects_non_finite() {
        let catalog = catalog();
        assert!(catalog.system_cpu_usage().set(&[], f64::NAN).is_err());
        catalog.system_cpu_usage().set(&[], 12.5).unwrap();
        assert_eq!(catalog.system_cpu_usage().value(&[]), 12.5);
    }

    #[test]
    fn test_cache_operation_labels() {
        assert_eq!(CacheOperation::Hit.as_str(), "hit");
        assert_eq!(CacheOperation::Miss.as_str(), "miss");
        assert_eq!(CacheOperation::Set.as_str(), "set");
        assert_eq!(CacheOperation::Delete.as_str(), "delete");
        assert_eq!(CacheOperation::Error.as_str(), "error");
    }
}
