//! Prometheus instrumentation for reqmeter
//!
//! - [`registry`]: named instruments, created once per registry
//! - [`catalog`]: typed handles for every metric the service exports
//! - [`readback`]: never-failing read-back used by derived gauges
//!
//! Metrics are exposed via the `/metrics` endpoint in Prometheus text format.

pub mod catalog;
pub mod readback;
pub mod registry;

pub use catalog::{
    CacheOperation, CounterHandle, GaugeHandle, HistogramHandle, InstrumentCatalog, RESERVED_LABEL_NAMES,
};
pub use registry::{
    CollectedSeries, DEFAULT_LATENCY_BUCKETS, Instrument, InstrumentKind, InstrumentSpec,
    MetricRegistry, SeriesValue,
};
