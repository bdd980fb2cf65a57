//! Budget policy records.

use crate::matching::MatchPatterns;
use costguard_types::{BudgetId, BudgetPeriod, BudgetScope, ConfigError, RunContext};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What to do the first time a soft utilization threshold is crossed
/// within a period. Soft actions never stop an in-flight run.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdAction {
    /// Record a warning, change nothing.
    LogOnly,
    /// Signal routing to prefer fallback models.
    DowngradeModel,
    /// Cap token usage for subsequent model calls.
    LimitCapabilities,
    /// Stop admitting new runs; in-flight runs continue.
    HaltNewRuns,
}

impl Default for ThresholdAction {
    fn default() -> Self {
        ThresholdAction::LogOnly
    }
}

/// What to do once utilization reaches 1.0 on a budget with
/// `hard_limit: true`.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardLimitAction {
    /// Refuse new admissions; in-flight runs finish.
    RejectNewRuns,
    /// Additionally stop in-flight runs at their next hook.
    HaltRun,
}

impl Default for HardLimitAction {
    fn default() -> Self {
        HardLimitAction::RejectNewRuns
    }
}

/// Per-run ceilings, enforced independently of the period budget.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetConstraints {
    /// Iterations a single run may start.
    #[serde(default)]
    pub max_iterations: Option<u64>,
    /// Tool calls a single run may make.
    #[serde(default)]
    pub max_tool_calls: Option<u64>,
    /// Tokens (input + output) a single run may consume.
    #[serde(default)]
    pub max_tokens: Option<u64>,
    /// Cost a single run may accumulate.
    #[serde(default)]
    pub max_cost: Option<Decimal>,
}

/// One declarative budget policy.
///
/// Immutable after load; the policy store swaps whole snapshots on
/// refresh. Every context the matcher accepts is accounted against this
/// budget, pooled at the budget's scope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSpec {
    /// Unique id of this budget within the snapshot.
    pub id: BudgetId,
    /// Hierarchy level spend is pooled at.
    pub scope: BudgetScope,
    /// Which contexts this budget applies to.
    #[serde(default, rename = "match")]
    pub matcher: MatchPatterns,
    /// Accounting period. Windows align to UTC boundaries.
    #[serde(default = "default_period")]
    pub period: BudgetPeriod,
    /// Spend ceiling per period. Zero means cost-unlimited (the budget
    /// may still cap runs, concurrency, or per-run constraints).
    #[serde(default)]
    pub max_cost: Decimal,
    /// Utilization fractions in (0, 1], ascending, each signaled once
    /// per period.
    #[serde(default)]
    pub soft_thresholds: Vec<Decimal>,
    /// Whether utilization ≥ 1.0 triggers the hard-limit action.
    #[serde(default)]
    pub hard_limit: bool,
    /// Action on first crossing of each soft threshold.
    #[serde(default)]
    pub on_soft_threshold_exceeded: ThresholdAction,
    /// Action once the hard limit is reached.
    #[serde(default)]
    pub on_hard_limit_exceeded: HardLimitAction,
    /// Ceiling on runs admitted per period.
    #[serde(default)]
    pub max_runs_per_period: Option<u64>,
    /// Ceiling on simultaneously-running runs.
    #[serde(default)]
    pub max_concurrent_runs: Option<u64>,
    /// Per-run ceilings.
    #[serde(default)]
    pub constraints: BudgetConstraints,
    /// Disabled budgets are loaded but never matched.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_period() -> BudgetPeriod {
    BudgetPeriod::Daily
}

fn default_true() -> bool {
    true
}

impl BudgetSpec {
    /// A minimal enabled budget for the given scope and matcher.
    pub fn new(id: impl Into<BudgetId>, scope: BudgetScope, matcher: MatchPatterns) -> Self {
        Self {
            id: id.into(),
            scope,
            matcher,
            period: default_period(),
            max_cost: Decimal::ZERO,
            soft_thresholds: Vec::new(),
            hard_limit: false,
            on_soft_threshold_exceeded: ThresholdAction::default(),
            on_hard_limit_exceeded: HardLimitAction::default(),
            max_runs_per_period: None,
            max_concurrent_runs: None,
            constraints: BudgetConstraints::default(),
            enabled: true,
        }
    }

    /// Whether this budget applies to a run context.
    pub fn applies_to(&self, ctx: &RunContext) -> bool {
        self.enabled && self.matcher.matches(ctx)
    }

    /// Priority score: scope weight plus matcher specificity. Budgets
    /// don't compete (all matches apply), but the score orders headroom
    /// reporting and gives routing its selection rule.
    pub fn priority(&self) -> u32 {
        self.scope.weight() + self.matcher.specificity()
    }

    /// Structural validation at load time.
    ///
    /// Thresholds must be ascending and in (0, 1]; max_cost must be
    /// non-negative. Violations reject the document (prior snapshot is
    /// kept by the store).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_cost < Decimal::ZERO {
            return Err(ConfigError::Invalid(format!(
                "budget {}: max_cost must be non-negative",
                self.id
            )));
        }
        let mut prev: Option<Decimal> = None;
        for t in &self.soft_thresholds {
            if *t <= Decimal::ZERO || *t > Decimal::ONE {
                return Err(ConfigError::Invalid(format!(
                    "budget {}: soft threshold {t} outside (0, 1]",
                    self.id
                )));
            }
            if let Some(p) = prev {
                if *t <= p {
                    return Err(ConfigError::Invalid(format!(
                        "budget {}: soft thresholds must be strictly ascending",
                        self.id
                    )));
                }
            }
            prev = Some(*t);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::Pattern;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn ctx(tenant: &str) -> RunContext {
        RunContext::new(tenant, "s", "w", "r", Utc::now())
    }

    #[test]
    fn deserializes_with_defaults() {
        let spec: BudgetSpec = serde_json::from_value(serde_json::json!({
            "id": "tenant-cap",
            "scope": "tenant",
            "match": { "tenant_id": "acme" },
            "max_cost": "100"
        }))
        .unwrap();
        assert_eq!(spec.period, BudgetPeriod::Daily);
        assert!(spec.enabled);
        assert!(!spec.hard_limit);
        assert_eq!(spec.max_cost, dec!(100));
        assert_eq!(spec.on_hard_limit_exceeded, HardLimitAction::RejectNewRuns);
    }

    #[test]
    fn disabled_budget_never_applies() {
        let mut spec = BudgetSpec::new("b", BudgetScope::Global, MatchPatterns::any());
        assert!(spec.applies_to(&ctx("anyone")));
        spec.enabled = false;
        assert!(!spec.applies_to(&ctx("anyone")));
    }

    #[test]
    fn priority_sums_scope_and_specificity() {
        let spec = BudgetSpec::new(
            "b",
            BudgetScope::Workflow,
            MatchPatterns {
                tenant_id: Pattern::parse("acme"),
                strand_id: Pattern::parse("*"),
                workflow_id: Pattern::parse("nightly"),
            },
        );
        assert_eq!(spec.priority(), 30 + 1 + 4);
    }

    #[test]
    fn validate_rejects_unsorted_thresholds() {
        let mut spec = BudgetSpec::new("b", BudgetScope::Global, MatchPatterns::any());
        spec.soft_thresholds = vec![dec!(0.9), dec!(0.5)];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_thresholds() {
        let mut spec = BudgetSpec::new("b", BudgetScope::Global, MatchPatterns::any());
        spec.soft_thresholds = vec![dec!(0)];
        assert!(spec.validate().is_err());
        spec.soft_thresholds = vec![dec!(1.1)];
        assert!(spec.validate().is_err());
        spec.soft_thresholds = vec![dec!(1)];
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn actions_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&ThresholdAction::HaltNewRuns).unwrap(),
            "\"halt_new_runs\""
        );
        assert_eq!(
            serde_json::to_string(&HardLimitAction::RejectNewRuns).unwrap(),
            "\"reject_new_runs\""
        );
    }
}
