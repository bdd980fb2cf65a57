//! Routing policy records.

use crate::matching::MatchPatterns;
use costguard_types::{PolicyId, RunContext, Stage};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Conditions under which a stage downgrades to its fallback model.
///
/// Clauses are evaluated in a fixed order: soft-threshold, remaining
/// budget, iteration count, latency. Any configured clause firing is
/// enough.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DowngradeTrigger {
    /// Fire when any applicable budget has a soft threshold crossed
    /// with a `downgrade_model` action.
    #[serde(default)]
    pub soft_threshold_exceeded: bool,
    /// Fire when remaining budget drops below this amount.
    #[serde(default)]
    pub remaining_budget_below: Option<Decimal>,
    /// Fire when the run's iteration count exceeds this.
    #[serde(default)]
    pub iteration_count_above: Option<u64>,
    /// Fire when average model latency exceeds this.
    #[serde(default)]
    pub latency_above_ms: Option<f64>,
}

impl DowngradeTrigger {
    /// Whether any clause is configured at all.
    pub fn is_configured(&self) -> bool {
        self.soft_threshold_exceeded
            || self.remaining_budget_below.is_some()
            || self.iteration_count_above.is_some()
            || self.latency_above_ms.is_some()
    }
}

/// Per-stage model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Stage name this config applies to (`planning`, `tool_selection`,
    /// `synthesis`, `other`).
    pub stage: String,
    /// Model used when no trigger fires.
    pub default_model: String,
    /// Model substituted when a trigger fires. Without a fallback the
    /// stage never downgrades.
    #[serde(default)]
    pub fallback_model: Option<String>,
    /// Token ceiling for calls in this stage.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Sampling temperature for calls in this stage.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// When to downgrade.
    #[serde(default)]
    pub downgrade_trigger: DowngradeTrigger,
}

impl StageConfig {
    /// Whether this config covers the given stage.
    pub fn covers(&self, stage: &Stage) -> bool {
        self.stage == stage.as_str()
    }
}

/// One declarative routing policy.
///
/// Unlike budgets, routing policies compete: only the highest-priority
/// matching policy drives model selection, ties broken by load order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    /// Unique id of this policy within the snapshot.
    pub id: PolicyId,
    /// Which contexts this policy applies to.
    #[serde(default, rename = "match")]
    pub matcher: MatchPatterns,
    /// Model for stages with no [`StageConfig`].
    pub default_model: String,
    /// Fleet-wide fallback, used by stages that configure a trigger but
    /// no stage-level fallback.
    #[serde(default)]
    pub default_fallback_model: Option<String>,
    /// Stage-specific selection.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl RoutingPolicy {
    /// Whether this policy applies to a run context.
    pub fn applies_to(&self, ctx: &RunContext) -> bool {
        self.matcher.matches(ctx)
    }

    /// Priority score, same formula as budgets.
    pub fn priority(&self) -> u32 {
        self.matcher.specificity()
    }

    /// The stage config covering a stage, if any.
    pub fn stage(&self, stage: &Stage) -> Option<&StageConfig> {
        self.stages.iter().find(|s| s.covers(stage))
    }
}
