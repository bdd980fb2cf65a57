#![deny(missing_docs)]
//! Tracing-based metrics emission for costguard.
//!
//! Implements [`MetricsEmitter`] by emitting [`tracing`] events carrying
//! the stable `genai.*` counter names and `strands.*` attribute schema —
//! users bring their own `tracing-opentelemetry` (or `metrics`-bridge)
//! subscriber for export. Counters are monotonic; the emitter observes
//! but never controls, and emission never fails the calling hook.
//!
//! # Usage
//!
//! ```no_run
//! use costguard_otel::TracingEmitter;
//!
//! let emitter = TracingEmitter::new();
//! // Pass to CostGuard::builder(...).emitter(emitter).build()
//! ```
//!
//! # Event schema
//!
//! Every counter addition is one `tracing` event at `INFO` on the
//! `costguard::metrics` target:
//!
//! | Field | Value |
//! |-------|-------|
//! | `metric` | Stable metric name (`genai.cost.total`, …) |
//! | `value` | The added amount |
//! | `attrs` | The flat attribute pairs, JSON-encoded |

use costguard_types::metrics::Attribute;
use costguard_types::{MetricsEmitter, MetricsError};
use rust_decimal::Decimal;

/// A [`MetricsEmitter`] that forwards counters to [`tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEmitter;

impl TracingEmitter {
    /// Create the emitter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn render_attrs(attrs: &[Attribute]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = attrs
        .iter()
        .map(|(key, value)| (key.clone(), serde_json::Value::from(value.clone())))
        .collect();
    serde_json::Value::Object(map).to_string()
}

impl MetricsEmitter for TracingEmitter {
    fn add_u64(
        &self,
        name: &'static str,
        value: u64,
        attrs: &[Attribute],
    ) -> Result<(), MetricsError> {
        tracing::info!(
            target: "costguard::metrics",
            metric = name,
            value,
            attrs = %render_attrs(attrs),
            "counter add"
        );
        Ok(())
    }

    fn add_cost(
        &self,
        name: &'static str,
        value: Decimal,
        attrs: &[Attribute],
    ) -> Result<(), MetricsError> {
        tracing::info!(
            target: "costguard::metrics",
            metric = name,
            value = %value,
            attrs = %render_attrs(attrs),
            "counter add"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costguard_types::metrics::{attr, name};
    use rust_decimal_macros::dec;

    #[test]
    fn emission_is_infallible() {
        let emitter = TracingEmitter::new();
        let attrs = [
            (attr::TENANT_ID.to_string(), "acme".to_string()),
            (attr::MODEL_NAME.to_string(), "gpt-4o".to_string()),
        ];
        assert!(emitter.add_u64(name::TOKENS_INPUT, 1000, &attrs).is_ok());
        assert!(emitter.add_cost(name::COST_TOTAL, dec!(0.5), &attrs).is_ok());
    }

    #[test]
    fn attrs_render_as_flat_json() {
        let rendered = render_attrs(&[
            (attr::TENANT_ID.to_string(), "acme".to_string()),
            (attr::REASON.to_string(), "budget \"cap\" hit".to_string()),
        ]);
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["strands.tenant_id"], "acme");
        assert_eq!(parsed["strands.reason"], "budget \"cap\" hit");
    }

    #[test]
    fn empty_attrs_render_as_empty_object() {
        assert_eq!(render_attrs(&[]), "{}");
    }
}
