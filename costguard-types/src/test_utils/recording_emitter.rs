//! RecordingEmitter — captures every counter for inspection in tests.

use crate::error::MetricsError;
use crate::metrics::{Attribute, MetricsEmitter};
use rust_decimal::Decimal;
use std::sync::Mutex;

/// A recorded counter addition.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    /// Metric name.
    pub name: &'static str,
    /// The added value. Integer counters are widened to `Decimal`.
    pub value: Decimal,
    /// Attributes as (key, value) pairs.
    pub attrs: Vec<(String, String)>,
}

/// A [`MetricsEmitter`] that records instead of exporting.
/// Use `.recorded()` to inspect, `.total(name)` to sum one counter.
#[derive(Default)]
pub struct RecordingEmitter {
    metrics: Mutex<Vec<RecordedMetric>>,
}

impl RecordingEmitter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, in emission order.
    pub fn recorded(&self) -> Vec<RecordedMetric> {
        self.metrics.lock().unwrap().clone()
    }

    /// Sum of all additions to one counter.
    pub fn total(&self, name: &str) -> Decimal {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name == name)
            .map(|m| m.value)
            .sum()
    }

    /// Number of additions to one counter.
    pub fn count(&self, name: &str) -> usize {
        self.metrics
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.name == name)
            .count()
    }
}

impl MetricsEmitter for RecordingEmitter {
    fn add_u64(
        &self,
        name: &'static str,
        value: u64,
        attrs: &[Attribute],
    ) -> Result<(), MetricsError> {
        self.metrics.lock().unwrap().push(RecordedMetric {
            name,
            value: Decimal::from(value),
            attrs: attrs.to_vec(),
        });
        Ok(())
    }

    fn add_cost(
        &self,
        name: &'static str,
        value: Decimal,
        attrs: &[Attribute],
    ) -> Result<(), MetricsError> {
        self.metrics.lock().unwrap().push(RecordedMetric {
            name,
            value,
            attrs: attrs.to_vec(),
        });
        Ok(())
    }
}
