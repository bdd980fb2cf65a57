#![deny(missing_docs)]
//! Adaptive model routing under budget pressure.
//!
//! Given a routing policy, a stage, and the current budget signals, the
//! evaluator picks the effective model for a call. Downgrade-trigger
//! clauses are evaluated in a fixed order — soft threshold, remaining
//! budget, iteration count, latency — and the first configured clause
//! that fires selects the fallback model.

use costguard_policy::{RoutingPolicy, StageConfig};
use costguard_types::Stage;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Budget-pressure signals feeding a routing decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingSignals {
    /// A budget with a `downgrade_model` soft action stands crossed.
    pub soft_threshold_exceeded: bool,
    /// Tightest remaining budget across cost-capped budgets.
    pub remaining_budget: Option<Decimal>,
    /// Iterations the run has started.
    pub iteration_count: u64,
    /// Average model latency reported for the run.
    pub avg_latency_ms: Option<f64>,
}

/// The evaluator's verdict for one model call.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSelection {
    /// The model the call should use.
    pub model: String,
    /// Token ceiling from the stage config, if any.
    pub max_tokens: Option<u32>,
    /// Sampling temperature from the stage config, if any.
    pub temperature: Option<f32>,
    /// Whether a trigger replaced the stage default with a fallback.
    pub was_downgraded: bool,
    /// Which clause fired, when a downgrade happened.
    pub reason: Option<String>,
}

impl RouteSelection {
    fn default_for(model: &str, stage: Option<&StageConfig>) -> Self {
        Self {
            model: model.to_string(),
            max_tokens: stage.and_then(|s| s.max_tokens),
            temperature: stage.and_then(|s| s.temperature),
            was_downgraded: false,
            reason: None,
        }
    }
}

/// Evaluate a routing policy for one model call.
///
/// 1. No stage config covering `stage` → the policy default, no
///    downgrade, no token ceiling.
/// 2. Any configured trigger clause fires and a fallback is available
///    (stage-level, else the policy's `default_fallback_model`) → the
///    fallback, with a reason naming the clause.
/// 3. Otherwise → the stage default with the stage's token ceiling.
pub fn evaluate(
    policy: &RoutingPolicy,
    stage: &Stage,
    signals: &RoutingSignals,
) -> RouteSelection {
    let Some(stage_config) = policy.stage(stage) else {
        return RouteSelection::default_for(&policy.default_model, None);
    };

    let fallback = stage_config
        .fallback_model
        .as_deref()
        .or(policy.default_fallback_model.as_deref());

    if let Some(clause) = fired_clause(stage_config, signals) {
        if let Some(fallback) = fallback {
            tracing::debug!(
                stage = %stage,
                from = %stage_config.default_model,
                to = fallback,
                clause = %clause,
                "routing downgrade"
            );
            return RouteSelection {
                model: fallback.to_string(),
                max_tokens: stage_config.max_tokens,
                temperature: stage_config.temperature,
                was_downgraded: true,
                reason: Some(format!(
                    "downgraded from {} to {fallback}: {clause}",
                    stage_config.default_model
                )),
            };
        }
        tracing::debug!(stage = %stage, clause = %clause, "downgrade trigger fired but no fallback configured");
    }

    RouteSelection::default_for(&stage_config.default_model, Some(stage_config))
}

/// The first configured clause that fires, in the fixed evaluation
/// order. Returns a human-readable description of the clause.
fn fired_clause(stage: &StageConfig, signals: &RoutingSignals) -> Option<String> {
    let trigger = &stage.downgrade_trigger;
    if trigger.soft_threshold_exceeded && signals.soft_threshold_exceeded {
        return Some("soft budget threshold exceeded".to_string());
    }
    if let Some(floor) = trigger.remaining_budget_below {
        if let Some(remaining) = signals.remaining_budget {
            if remaining < floor {
                return Some(format!("remaining budget {remaining} below {floor}"));
            }
        }
    }
    if let Some(ceiling) = trigger.iteration_count_above {
        if signals.iteration_count > ceiling {
            return Some(format!(
                "iteration count {} above {ceiling}",
                signals.iteration_count
            ));
        }
    }
    if let Some(ceiling) = trigger.latency_above_ms {
        if let Some(latency) = signals.avg_latency_ms {
            if latency > ceiling {
                return Some(format!("average latency {latency:.0}ms above {ceiling:.0}ms"));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use costguard_policy::{DowngradeTrigger, MatchPatterns};
    use costguard_types::PolicyId;
    use rust_decimal_macros::dec;

    fn policy() -> RoutingPolicy {
        RoutingPolicy {
            id: PolicyId::new("p"),
            matcher: MatchPatterns::any(),
            default_model: "gpt-4o".into(),
            default_fallback_model: Some("gpt-4o-mini".into()),
            stages: vec![
                StageConfig {
                    stage: "synthesis".into(),
                    default_model: "gpt-4o".into(),
                    fallback_model: Some("gpt-4o-mini".into()),
                    max_tokens: Some(4096),
                    temperature: Some(0.2),
                    downgrade_trigger: DowngradeTrigger {
                        soft_threshold_exceeded: true,
                        remaining_budget_below: Some(dec!(10)),
                        iteration_count_above: Some(20),
                        latency_above_ms: Some(5000.0),
                    },
                },
                StageConfig {
                    stage: "planning".into(),
                    default_model: "o3".into(),
                    fallback_model: None,
                    max_tokens: None,
                    temperature: None,
                    downgrade_trigger: DowngradeTrigger {
                        soft_threshold_exceeded: true,
                        ..Default::default()
                    },
                },
                StageConfig {
                    stage: "tool_selection".into(),
                    default_model: "gpt-4o-mini".into(),
                    fallback_model: Some("gpt-4o-mini".into()),
                    max_tokens: Some(512),
                    temperature: None,
                    downgrade_trigger: DowngradeTrigger::default(),
                },
            ],
        }
    }

    #[test]
    fn unknown_stage_falls_back_to_policy_default() {
        let selection = evaluate(&policy(), &Stage::Other, &RoutingSignals::default());
        assert_eq!(selection.model, "gpt-4o");
        assert!(!selection.was_downgraded);
        assert!(selection.max_tokens.is_none());
    }

    #[test]
    fn quiet_signals_keep_the_stage_default() {
        let selection = evaluate(&policy(), &Stage::Synthesis, &RoutingSignals::default());
        assert_eq!(selection.model, "gpt-4o");
        assert!(!selection.was_downgraded);
        assert_eq!(selection.max_tokens, Some(4096));
        assert_eq!(selection.temperature, Some(0.2));
    }

    #[test]
    fn soft_threshold_downgrades_with_reason() {
        let signals = RoutingSignals {
            soft_threshold_exceeded: true,
            ..Default::default()
        };
        let selection = evaluate(&policy(), &Stage::Synthesis, &signals);
        assert_eq!(selection.model, "gpt-4o-mini");
        assert!(selection.was_downgraded);
        let reason = selection.reason.unwrap();
        assert!(reason.contains("soft budget threshold"));
        assert!(reason.contains("gpt-4o"));
    }

    #[test]
    fn clause_order_is_fixed() {
        // Both the soft-threshold and latency clauses would fire; the
        // soft-threshold clause is named because it is evaluated first.
        let signals = RoutingSignals {
            soft_threshold_exceeded: true,
            avg_latency_ms: Some(60_000.0),
            ..Default::default()
        };
        let selection = evaluate(&policy(), &Stage::Synthesis, &signals);
        assert!(selection.reason.unwrap().contains("soft budget threshold"));
    }

    #[test]
    fn remaining_budget_clause_is_strictly_below() {
        let at_floor = RoutingSignals {
            remaining_budget: Some(dec!(10)),
            ..Default::default()
        };
        assert!(!evaluate(&policy(), &Stage::Synthesis, &at_floor).was_downgraded);

        let below_floor = RoutingSignals {
            remaining_budget: Some(dec!(9.99)),
            ..Default::default()
        };
        let selection = evaluate(&policy(), &Stage::Synthesis, &below_floor);
        assert!(selection.was_downgraded);
        assert!(selection.reason.unwrap().contains("remaining budget"));
    }

    #[test]
    fn iteration_clause_is_strictly_above() {
        let at_ceiling = RoutingSignals {
            iteration_count: 20,
            ..Default::default()
        };
        assert!(!evaluate(&policy(), &Stage::Synthesis, &at_ceiling).was_downgraded);

        let above = RoutingSignals {
            iteration_count: 21,
            ..Default::default()
        };
        assert!(evaluate(&policy(), &Stage::Synthesis, &above).was_downgraded);
    }

    #[test]
    fn trigger_without_fallback_keeps_the_default() {
        // The planning stage has a trigger but no stage fallback; the
        // policy-level fallback steps in.
        let signals = RoutingSignals {
            soft_threshold_exceeded: true,
            ..Default::default()
        };
        let selection = evaluate(&policy(), &Stage::Planning, &signals);
        assert_eq!(selection.model, "gpt-4o-mini");
        assert!(selection.was_downgraded);

        // With no fallback anywhere, the default stands.
        let mut bare = policy();
        bare.default_fallback_model = None;
        bare.stages[1].fallback_model = None;
        let selection = evaluate(&bare, &Stage::Planning, &signals);
        assert_eq!(selection.model, "o3");
        assert!(!selection.was_downgraded);
    }

    #[test]
    fn unconfigured_clauses_never_fire() {
        let noisy = RoutingSignals {
            soft_threshold_exceeded: true,
            remaining_budget: Some(dec!(0)),
            iteration_count: 1000,
            avg_latency_ms: Some(99_000.0),
        };
        let selection = evaluate(&policy(), &Stage::ToolSelection, &noisy);
        assert_eq!(selection.model, "gpt-4o-mini");
        assert!(!selection.was_downgraded);
    }
}
