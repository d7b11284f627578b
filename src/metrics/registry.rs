//! Instrument registry
//!
//! Owns every named instrument of a process (or of a test) and the Prometheus
//! registry they are exported through. Instruments are created on the first
//! `get_or_create` call for a name and returned unchanged on every later call.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder, core::Collector,
};

use crate::config::MetricsConfig;
use crate::error::MetricsError;

/// Default latency buckets in seconds
pub const DEFAULT_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Kind of a registered instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Counter,
    Histogram,
    Gauge,
}

impl InstrumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Histogram => "histogram",
            Self::Gauge => "gauge",
        }
    }
}

/// Definition passed to [`MetricRegistry::get_or_create`]
///
/// `name` is given without the registry prefix; the registry qualifies it.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    name: String,
    kind: InstrumentKind,
    labels: Vec<String>,
    description: String,
    buckets: Option<Vec<f64>>,
}

impl InstrumentSpec {
    fn new(kind: InstrumentKind, name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            labels: Vec::new(),
            description: description.to_string(),
            buckets: None,
        }
    }

    pub fn counter(name: &str, description: &str) -> Self {
        Self::new(InstrumentKind::Counter, name, description)
    }

    pub fn histogram(name: &str, description: &str) -> Self {
        Self::new(InstrumentKind::Histogram, name, description)
    }

    pub fn gauge(name: &str, description: &str) -> Self {
        Self::new(InstrumentKind::Gauge, name, description)
    }

    /// Set the ordered label schema
    pub fn labels(mut self, labels: &[&str]) -> Self {
        self.labels = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Set histogram buckets (ignored for counters and gauges)
    pub fn buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }
}

#[derive(Clone)]
pub(crate) enum Collectors {
    Counter(CounterVec),
    Histogram(HistogramVec),
    Gauge(GaugeVec),
}

struct InstrumentInner {
    name: String,
    kind: InstrumentKind,
    labels: Vec<String>,
    description: String,
    collector: Collectors,
}

/// A named, typed instrument held by a [`MetricRegistry`]
///
/// Cheap to clone; clones share the same underlying series.
#[derive(Clone)]
pub struct Instrument {
    inner: Arc<InstrumentInner>,
}

impl std::fmt::Debug for Instrument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrument")
            .field("name", &self.inner.name)
            .field("kind", &self.inner.kind)
            .field("labels", &self.inner.labels)
            .finish()
    }
}

impl Instrument {
    /// Fully qualified name (prefix included)
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> InstrumentKind {
        self.inner.kind
    }

    /// Ordered label schema
    pub fn label_names(&self) -> &[String] {
        &self.inner.labels
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// True when both handles refer to the same registered instrument
    pub fn same_as(&self, other: &Instrument) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn collectors(&self) -> &Collectors {
        &self.inner.collector
    }

    /// Gather the currently materialized series without creating new ones
    pub(crate) fn collect(&self) -> Vec<prometheus::proto::MetricFamily> {
        match &self.inner.collector {
            Collectors::Counter(c) => c.collect(),
            Collectors::Histogram(h) => h.collect(),
            Collectors::Gauge(g) => g.collect(),
        }
    }

    /// Check positional label values against the schema arity
    pub(crate) fn check_arity(&self, values: &[&str]) -> Result<(), MetricsError> {
        if values.len() != self.inner.labels.len() {
            return Err(MetricsError::LabelMismatch {
                name: self.inner.name.clone(),
                reason: format!(
                    "expected {} label values {:?}, got {}",
                    self.inner.labels.len(),
                    self.inner.labels,
                    values.len()
                ),
            });
        }
        Ok(())
    }

    /// Order keyed label values by the schema, rejecting unknown or missing keys
    pub fn label_values<'a>(&self, pairs: &[(&str, &'a str)]) -> Result<Vec<&'a str>, MetricsError> {
        if let Some((unknown, _)) = pairs
            .iter()
            .find(|(key, _)| !self.inner.labels.iter().any(|l| l.as_str() == *key))
        {
            return Err(MetricsError::LabelMismatch {
                name: self.inner.name.clone(),
                reason: format!("unknown label '{}'", unknown),
            });
        }

        self.inner
            .labels
            .iter()
            .map(|label| {
                pairs
                    .iter()
                    .find(|(key, _)| *key == label.as_str())
                    .map(|(_, value)| *value)
                    .ok_or_else(|| MetricsError::LabelMismatch {
                        name: self.inner.name.clone(),
                        reason: format!("missing label '{}'", label),
                    })
            })
            .collect()
    }

    fn matches(&self, spec: &InstrumentSpec) -> bool {
        self.inner.kind == spec.kind && self.inner.labels == spec.labels
    }
}

/// Value of one collected series
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Counter(f64),
    Gauge(f64),
    Histogram { count: u64, sum: f64 },
}

/// One labeled series produced by [`MetricRegistry::collect_all`]
#[derive(Debug, Clone)]
pub struct CollectedSeries {
    pub name: String,
    pub kind: InstrumentKind,
    pub labels: Vec<(String, String)>,
    pub value: SeriesValue,
}

impl CollectedSeries {
    /// Look up a label value by name
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Registry of named instruments
///
/// Constructed once at startup and shared as `Arc<MetricRegistry>`. Tests
/// construct a fresh registry each instead of sharing global state.
pub struct MetricRegistry {
    prefix: String,
    const_labels: HashMap<String, String>,
    registry: Registry,
    instruments: RwLock<HashMap<String, Instrument>>,
}

impl MetricRegistry {
    /// Create an empty registry
    ///
    /// `default_labels` are attached to every instrument as constant labels.
    pub fn new(prefix: impl Into<String>, default_labels: HashMap<String, String>) -> Self {
        Self {
            prefix: prefix.into(),
            const_labels: default_labels,
            registry: Registry::new(),
            instruments: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry from the `[metrics]` configuration section
    pub fn from_config(config: &MetricsConfig) -> Self {
        Self::new(config.prefix.clone(), config.default_labels.clone())
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Instrument names are always stored with the prefix, even when the
    /// given name already starts with the prefix text
    fn qualify(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn check_existing(existing: &Instrument, spec: &InstrumentSpec) -> Result<Instrument, MetricsError> {
        if existing.matches(spec) {
            Ok(existing.clone())
        } else {
            Err(MetricsError::SchemaConflict {
                name: existing.name().to_string(),
                existing_kind: existing.kind(),
                existing_labels: existing.label_names().to_vec(),
                requested_kind: spec.kind,
                requested_labels: spec.labels.clone(),
            })
        }
    }

    /// Return the instrument registered under `spec.name`, creating it on first use
    ///
    /// # Errors
    ///
    /// - `SchemaConflict` when the name exists with a different kind or label schema
    /// - `Prometheus` when the underlying registry rejects the collector
    pub fn get_or_create(&self, spec: InstrumentSpec) -> Result<Instrument, MetricsError> {
        if spec.name.is_empty() {
            return Err(MetricsError::InvalidDefinition {
                name: spec.name,
                reason: "metric name cannot be empty".to_string(),
            });
        }
        if let Some(clash) = spec.labels.iter().find(|l| self.const_labels.contains_key(*l)) {
            return Err(MetricsError::InvalidDefinition {
                name: spec.name.clone(),
                reason: format!("label '{}' is already a default label of this registry", clash),
            });
        }
        let full_name = self.qualify(&spec.name);

        {
            let instruments = self
                .instruments
                .read()
                .map_err(|e| MetricsError::LockPoisoned(e.to_string()))?;
            if let Some(existing) = instruments.get(&full_name) {
                return Self::check_existing(existing, &spec);
            }
        }

        let mut instruments = self
            .instruments
            .write()
            .map_err(|e| MetricsError::LockPoisoned(e.to_string()))?;

        // Another caller may have created it between the two locks
        if let Some(existing) = instruments.get(&full_name) {
            return Self::check_existing(existing, &spec);
        }

        let label_refs: Vec<&str> = spec.labels.iter().map(String::as_str).collect();
        let opts = Opts::new(full_name.clone(), spec.description.clone())
            .const_labels(self.const_labels.clone());

        let collector = match spec.kind {
            InstrumentKind::Counter => {
                let vec = CounterVec::new(opts, &label_refs)?;
                self.registry.register(Box::new(vec.clone()))?;
                Collectors::Counter(vec)
            }
            InstrumentKind::Gauge => {
                let vec = GaugeVec::new(opts, &label_refs)?;
                self.registry.register(Box::new(vec.clone()))?;
                Collectors::Gauge(vec)
            }
            InstrumentKind::Histogram => {
                let buckets = spec
                    .buckets
                    .clone()
                    .unwrap_or_else(|| DEFAULT_LATENCY_BUCKETS.to_vec());
                let vec = HistogramVec::new(HistogramOpts::from(opts).buckets(buckets), &label_refs)?;
                self.registry.register(Box::new(vec.clone()))?;
                Collectors::Histogram(vec)
            }
        };

        tracing::debug!(
            metric = %full_name,
            kind = spec.kind.as_str(),
            labels = ?spec.labels,
            "Registered instrument"
        );

        let instrument = Instrument {
            inner: Arc::new(InstrumentInner {
                name: full_name.clone(),
                kind: spec.kind,
                labels: spec.labels,
                description: spec.description,
                collector,
            }),
        };
        instruments.insert(full_name, instrument.clone());
        Ok(instrument)
    }

    /// Look up an already registered instrument
    ///
    /// An exact match on the full name wins over the unprefixed lookup.
    pub fn get(&self, name: &str) -> Option<Instrument> {
        let instruments = self.instruments.read().ok()?;
        instruments
            .get(name)
            .or_else(|| instruments.get(&self.qualify(name)))
            .cloned()
    }

    /// All registered instruments, sorted by name
    pub fn instruments(&self) -> Vec<Instrument> {
        let mut all: Vec<Instrument> = match self.instruments.read() {
            Ok(instruments) => instruments.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    /// Every materialized labeled series with its current value
    pub fn collect_all(&self) -> Vec<CollectedSeries> {
        let kinds: HashMap<String, InstrumentKind> = self
            .instruments()
            .into_iter()
            .map(|i| (i.name().to_string(), i.kind()))
            .collect();

        let mut series = Vec::new();
        for family in self.registry.gather() {
            let Some(kind) = kinds.get(family.name()).copied() else {
                continue;
            };
            for metric in family.get_metric() {
                let labels = metric
                    .get_label()
                    .iter()
                    .map(|lp| (lp.name().to_string(), lp.value().to_string()))
                    .collect();
                let value = match kind {
                    InstrumentKind::Counter => {
                        SeriesValue::Counter(metric.counter.value.unwrap_or(0.0))
                    }
                    InstrumentKind::Gauge => SeriesValue::Gauge(metric.gauge.value.unwrap_or(0.0)),
                    InstrumentKind::Histogram => SeriesValue::Histogram {
                        count: metric.histogram.sample_count.unwrap_or(0),
                        sum: metric.histogram.sample_sum.unwrap_or(0.0),
                    },
                };
                series.push(CollectedSeries {
                    name: family.name().to_string(),
                    kind,
                    labels,
                    value,
                });
            }
        }
        series
    }

    /// Encode all instruments in the Prometheus text exposition format
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder fails or produces invalid UTF-8.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();
        let metric_count = metric_families.len();

        tracing::debug!(
            metric_family_count = metric_count,
            "Encoding metrics to Prometheus text format"
        );

        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        prometheus::Encoder::encode(&encoder, &metric_families, &mut buffer).map_err(|e| {
            tracing::error!(
                error = %e,
                metric_family_count = metric_count,
                "Prometheus text encoder failed"
            );
            e
        })?;

        String::from_utf8(buffer).map_err(|e| {
            tracing::error!(
                invalid_byte_index = e.utf8_error().valid_up_to(),
                "Prometheus encoder produced invalid UTF-8"
            );
            MetricsError::Prometheus(prometheus::Error::Msg(format!(
                "Failed to convert metrics to UTF-8: {}",
                e
            )))
        })
    }

    /// Unregister and forget every instrument
    ///
    /// Only meant for test teardown; live handles keep working but are no
    /// longer exported.
    pub fn reset(&self) -> Result<(), MetricsError> {
        let mut instruments = self
            .instruments
            .write()
            .map_err(|e| MetricsError::LockPoisoned(e.to_string()))?;

        for instrument in instruments.values() {
            let boxed: Box<dyn Collector> = match instrument.collectors() {
                Collectors::Counter(c) => Box::new(c.clone()),
                Collectors::Histogram(h) => Box::new(h.clone()),
                Collectors::Gauge(g) => Box::new(g.clone()),
            };
            if let Err(e) = self.registry.unregister(boxed) {
                tracing::warn!(metric = %instrument.name(), error = %e, "Failed to unregister instrument");
            }
        }
        instruments.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn test_registry() -> MetricRegistry {
        let mut labels = HashMap::new();
        labels.insert("service".to_string(), "test".to_string());
        labels.insert("environment".to_string(), "test".to_string());
        MetricRegistry::new("app_", labels)
    }

    #[test]
    fn test_get_or_create_returns_same_instrument() {
        let registry = test_registry();
        let spec = InstrumentSpec::counter("jobs_total", "Jobs").labels(&["status"]);

        let first = registry.get_or_create(spec.clone()).expect("first create");
        let second = registry.get_or_create(spec).expect("second create");

        assert!(first.same_as(&second));
        assert_eq!(first.name(), "app_jobs_total");
        assert_eq!(registry.instruments().len(), 1);
    }

    #[test]
    fn test_prefix_is_always_applied() {
        let registry = test_registry();
        let a = registry
            .get_or_create(InstrumentSpec::gauge("depth", "Depth"))
            .unwrap();
        let b = registry
            .get_or_create(InstrumentSpec::counter("app_starts_total", "Starts"))
            .unwrap();

        assert_eq!(a.name(), "app_depth");
        assert_eq!(b.name(), "app_app_starts_total");
        assert!(registry.get("depth").unwrap().same_as(&a));
        assert!(registry.get("app_depth").unwrap().same_as(&a));
        assert!(registry.get("app_app_starts_total").unwrap().same_as(&b));
        assert!(registry.get("starts_total").is_none());
    }

    #[test]
    fn test_label_clashing_with_default_label_rejected() {
        let registry = test_registry();
        let err = registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs").labels(&["service", "status"]))
            .expect_err("service is a default label");
        assert!(matches!(err, MetricsError::InvalidDefinition { .. }));
        assert!(registry.instruments().is_empty());
    }

    #[test]
    fn test_schema_conflict_on_different_labels() {
        let registry = test_registry();
        registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs").labels(&["status"]))
            .unwrap();

        let err = registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs").labels(&["queue"]))
            .expect_err("different schema must conflict");
        assert!(matches!(err, MetricsError::SchemaConflict { .. }));
    }

    #[test]
    fn test_schema_conflict_on_different_kind() {
        let registry = test_registry();
        registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs"))
            .unwrap();

        let err = registry
            .get_or_create(InstrumentSpec::gauge("jobs_total", "Jobs"))
            .expect_err("different kind must conflict");
        match err {
            MetricsError::SchemaConflict {
                existing_kind,
                requested_kind,
                ..
            } => {
                assert_eq!(existing_kind, InstrumentKind::Counter);
                assert_eq!(requested_kind, InstrumentKind::Gauge);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = test_registry();
        let err = registry
            .get_or_create(InstrumentSpec::counter("", "nothing"))
            .expect_err("empty name");
        assert!(matches!(err, MetricsError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_concurrent_first_access_creates_one_instrument() {
        let registry = Arc::new(test_registry());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let r = Arc::clone(&registry);
                thread::spawn(move || {
                    r.get_or_create(InstrumentSpec::counter("race_total", "Race").labels(&["k"]))
                        .expect("create should succeed")
                })
            })
            .collect();

        let instruments: Vec<Instrument> = handles
            .into_iter()
            .map(|h| h.join().expect("thread should not panic"))
            .collect();

        assert!(instruments.iter().all(|i| i.same_as(&instruments[0])));
        assert_eq!(registry.instruments().len(), 1);
    }

    #[test]
    fn test_label_values_orders_by_schema() {
        let registry = test_registry();
        let instrument = registry
            .get_or_create(InstrumentSpec::counter("ops_total", "Ops").labels(&["backend", "operation"]))
            .unwrap();

        let values = instrument
            .label_values(&[("operation", "hit"), ("backend", "valkey")])
            .unwrap();
        assert_eq!(values, vec!["valkey", "hit"]);
    }

    #[test]
    fn test_label_values_rejects_unknown_and_missing_keys() {
        let registry = test_registry();
        let instrument = registry
            .get_or_create(InstrumentSpec::counter("ops_total", "Ops").labels(&["backend", "operation"]))
            .unwrap();

        assert!(instrument.label_values(&[("backend", "valkey")]).is_err());
        assert!(
            instrument
                .label_values(&[("backend", "valkey"), ("operation", "hit"), ("color", "red")])
                .is_err()
        );
    }

    #[test]
    fn test_collect_all_reports_values_and_default_labels() {
        let registry = test_registry();
        let counter = registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs").labels(&["status"]))
            .unwrap();
        if let Collectors::Counter(vec) = counter.collectors() {
            vec.with_label_values(&["ok"]).inc_by(3.0);
        }

        let series = registry.collect_all();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].name, "app_jobs_total");
        assert_eq!(series[0].value, SeriesValue::Counter(3.0));
        assert_eq!(series[0].label("status"), Some("ok"));
        assert_eq!(series[0].label("service"), Some("test"));
        assert_eq!(series[0].label("environment"), Some("test"));
    }

    #[test]
    fn test_encode_text_produces_exposition_format() {
        let registry = test_registry();
        let gauge = registry
            .get_or_create(InstrumentSpec::gauge("temperature", "Temperature"))
            .unwrap();
        if let Collectors::Gauge(vec) = gauge.collectors() {
            let no_labels: &[&str] = &[];
            vec.with_label_values(no_labels).set(21.5);
        }

        let output = registry.encode_text().expect("encode should succeed");
        assert!(output.contains("# HELP app_temperature Temperature"));
        assert!(output.contains("# TYPE app_temperature gauge"));
        assert!(output.contains("21.5"));
    }

    #[test]
    fn test_reset_forgets_instruments() {
        let registry = test_registry();
        let first = registry
            .get_or_create(InstrumentSpec::counter("jobs_total", "Jobs"))
            .unwrap();
        registry.reset().expect("reset should succeed");
        assert!(registry.instruments().is_empty());

        // A different schema is accepted after reset
        let second = registry
            .get_or_create(InstrumentSpec::gauge("jobs_total", "Jobs"))
            .expect("re-register after reset");
        assert!(!first.same_as(&second));
    }
}
