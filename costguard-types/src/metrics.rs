//! The metrics contract — monotonic counters with a stable schema.
//!
//! Metric names and attribute keys are bit-compatible with existing
//! deployments; treat every constant here as frozen. Emitters observe but
//! never control: an emission error is logged by the caller and swallowed,
//! it must never fail the lifecycle hook that triggered it.

use crate::error::MetricsError;
use rust_decimal::Decimal;

/// Stable metric names.
pub mod name {
    /// Total cost, in the pricing table's currency.
    pub const COST_TOTAL: &str = "genai.cost.total";
    /// Cost attributed to one model.
    pub const COST_MODEL: &str = "genai.cost.model";
    /// Cost attributed to one tool.
    pub const COST_TOOL: &str = "genai.cost.tool";
    /// Input tokens.
    pub const TOKENS_INPUT: &str = "genai.tokens.input";
    /// Output tokens.
    pub const TOKENS_OUTPUT: &str = "genai.tokens.output";
    /// Run starts and ends.
    pub const AGENT_RUNS: &str = "genai.agent.runs";
    /// Iterations started.
    pub const AGENT_ITERATIONS: &str = "genai.agent.iterations";
    /// Tool calls.
    pub const AGENT_TOOL_CALLS: &str = "genai.agent.tool_calls";
    /// Model downgrades applied by routing.
    pub const DOWNGRADE_EVENTS: &str = "genai.cost.downgrade_events";
    /// Admissions rejected.
    pub const REJECTION_EVENTS: &str = "genai.cost.rejection_events";
    /// Runs halted.
    pub const HALT_EVENTS: &str = "genai.cost.halt_events";
}

/// Stable attribute keys.
pub mod attr {
    /// Base attribute: tenant.
    pub const TENANT_ID: &str = "strands.tenant_id";
    /// Base attribute: strand.
    pub const STRAND_ID: &str = "strands.strand_id";
    /// Base attribute: workflow.
    pub const WORKFLOW_ID: &str = "strands.workflow_id";
    /// High-cardinality opt-in: run.
    pub const RUN_ID: &str = "strands.run_id";
    /// Prefix for entries of the run's metadata bag.
    pub const METADATA_PREFIX: &str = "strands.metadata.";
    /// Model a cost or token count is attributed to.
    pub const MODEL_NAME: &str = "genai.model.name";
    /// Model requested before a downgrade.
    pub const MODEL_ORIGINAL: &str = "genai.model.original";
    /// Model substituted by a downgrade.
    pub const MODEL_FALLBACK: &str = "genai.model.fallback";
    /// Tool a cost or call count is attributed to.
    pub const TOOL_NAME: &str = "strands.tool.name";
    /// Run lifecycle edge: `start` or `end`.
    pub const EVENT: &str = "strands.event";
    /// Run status at end.
    pub const STATUS: &str = "strands.status";
    /// Iteration index.
    pub const ITERATION_IDX: &str = "strands.iteration_idx";
    /// Human-readable reason on downgrade/rejection/halt events.
    pub const REASON: &str = "strands.reason";
}

/// One metric attribute. Keys and values are strings — the schema is
/// flat, and metadata-bag keys are built at runtime.
pub type Attribute = (String, String);

/// Sink for monotonic counters.
///
/// Injected into the decision pipeline at construction. The default
/// implementation (`costguard-otel`) forwards to `tracing`; unit tests
/// substitute the recording fake from
/// [`test_utils`](crate::test_utils::RecordingEmitter).
///
/// Counters only — no gauges, no histograms. Values are non-negative
/// deltas.
pub trait MetricsEmitter: Send + Sync {
    /// Add to an integer counter.
    ///
    /// Returning an error does NOT fail the calling hook — the pipeline
    /// logs it and continues.
    fn add_u64(&self, name: &'static str, value: u64, attrs: &[Attribute])
        -> Result<(), MetricsError>;

    /// Add to a currency counter.
    fn add_cost(
        &self,
        name: &'static str,
        value: Decimal,
        attrs: &[Attribute],
    ) -> Result<(), MetricsError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn object_safety() {
        _assert_send_sync::<Box<dyn MetricsEmitter>>();
        _assert_send_sync::<Arc<dyn MetricsEmitter>>();
    }

    #[test]
    fn metric_names_are_frozen() {
        // Renames here are wire-format breaks for downstream dashboards.
        assert_eq!(name::COST_TOTAL, "genai.cost.total");
        assert_eq!(name::AGENT_RUNS, "genai.agent.runs");
        assert_eq!(name::DOWNGRADE_EVENTS, "genai.cost.downgrade_events");
        assert_eq!(attr::TENANT_ID, "strands.tenant_id");
        assert_eq!(attr::TOOL_NAME, "strands.tool.name");
    }
}
