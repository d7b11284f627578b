//! Best-effort read-back of instrument values
//!
//! Used by derived gauges (cache hit ratio). Reading never creates a series
//! and never fails: anything that cannot be resolved reads as `0.0`.

use super::registry::{Instrument, InstrumentKind};

/// Read the current value of the first materialized series whose labels
/// contain every `(name, value)` pair in `labels`
///
/// An empty `labels` slice matches the first series (the only one for an
/// unlabeled instrument). Histograms read as their observation count.
pub fn read_value(instrument: &Instrument, labels: &[(&str, &str)]) -> f64 {
    let kind = instrument.kind();

    for family in instrument.collect() {
        for metric in family.get_metric() {
            let pairs = metric.get_label();
            let matches = labels.iter().all(|(name, value)| {
                pairs
                    .iter()
                    .any(|lp| lp.name() == *name && lp.value() == *value)
            });
            if !matches {
                continue;
            }

            let value = match kind {
                InstrumentKind::Counter => metric.counter.value.unwrap_or(0.0),
                InstrumentKind::Gauge => metric.gauge.value.unwrap_or(0.0),
                InstrumentKind::Histogram => metric.histogram.sample_count.unwrap_or(0) as f64,
            };
            return if value.is_finite() { value } else { 0.0 };
        }
    }

    0.0
}

/// Sum of all materialized series whose labels contain every pair in `labels`
pub fn sum_values(instrument: &Instrument, labels: &[(&str, &str)]) -> f64 {
    let kind = instrument.kind();

    instrument
        .collect()
        .iter()
        .flat_map(|family| family.get_metric().iter())
        .filter(|metric| {
            labels.iter().all(|(name, value)| {
                metric
                    .get_label()
                    .iter()
                    .any(|lp| lp.name() == *name && lp.value() == *value)
            })
        })
        .map(|metric| match kind {
            InstrumentKind::Counter => metric.counter.value.unwrap_or(0.0),
            InstrumentKind::Gauge => metric.gauge.value.unwrap_or(0.0),
            InstrumentKind::Histogram => metric.histogram.sample_count.unwrap_or(0) as f64,
        })
        .filter(|v| v.is_finite())
        .sum()
}
