//! Decisions — the structured return value of every lifecycle hook.
//!
//! The runtime is required to honor decisions: a rejected admission means
//! the run must not start, a halted iteration means the loop must stop.
//! Decisions deliberately carry human-readable reasons and machine-usable
//! headroom so the host can both log and adapt.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What the hook tells the runtime to do.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    /// Proceed normally.
    Allow,
    /// Do not admit this run.
    Reject,
    /// Stop the run at the next opportunity.
    Halt,
    /// Proceed, but with the fallback model.
    Downgrade,
    /// Proceed, but with reduced capabilities (see overrides).
    Limit,
}

/// Which lifecycle hook produced a decision.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// `on_run_start` / `on_run_end`.
    Admission,
    /// `on_iteration_start` / `on_iteration_end`.
    Iteration,
    /// `before_model_call` / `after_model_call`.
    Model,
    /// `before_tool_call` / `after_tool_call`.
    Tool,
}

/// How much room is left under the tightest applicable budget and
/// per-run constraints. `None` means unconstrained on that axis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headroom {
    /// Budget currency remaining before the tightest hard limit.
    pub remaining_cost: Option<Decimal>,
    /// Runs remaining in the current period.
    pub remaining_runs: Option<u64>,
    /// Iterations remaining for this run.
    pub remaining_iterations: Option<u64>,
    /// Tool calls remaining for this run.
    pub remaining_tool_calls: Option<u64>,
    /// Tokens remaining for this run.
    pub remaining_tokens: Option<u64>,
}

impl Headroom {
    /// Merge another headroom in, keeping the tighter value on each axis.
    pub fn tighten(&mut self, other: &Headroom) {
        fn min_opt<T: Copy + PartialOrd>(a: Option<T>, b: Option<T>) -> Option<T> {
            match (a, b) {
                (Some(x), Some(y)) => Some(if y < x { y } else { x }),
                (Some(x), None) => Some(x),
                (None, y) => y,
            }
        }
        self.remaining_cost = min_opt(self.remaining_cost, other.remaining_cost);
        self.remaining_runs = min_opt(self.remaining_runs, other.remaining_runs);
        self.remaining_iterations = min_opt(self.remaining_iterations, other.remaining_iterations);
        self.remaining_tool_calls = min_opt(self.remaining_tool_calls, other.remaining_tool_calls);
        self.remaining_tokens = min_opt(self.remaining_tokens, other.remaining_tokens);
    }
}

/// Modifications a soft-threshold action imposes on an otherwise-allowed
/// operation.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionOverrides {
    /// Token ceiling imposed by a `limit_capabilities` action.
    pub max_tokens_remaining: Option<u64>,
}

impl ActionOverrides {
    /// True when no override is set.
    pub fn is_empty(&self) -> bool {
        self.max_tokens_remaining.is_none()
    }
}

/// The structured return value of a lifecycle hook.
///
/// Invariant: `allowed` is `false` exactly when `action` is
/// [`DecisionAction::Reject`] or [`DecisionAction::Halt`].
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Which hook family produced this.
    pub kind: DecisionKind,
    /// Whether the operation may proceed.
    pub allowed: bool,
    /// What the runtime should do.
    pub action: DecisionAction,
    /// Human-readable explanation when the decision is not a plain allow.
    pub reason: Option<String>,
    /// Non-blocking diagnostics, in the order they were produced.
    pub warnings: Vec<String>,
    /// Remaining headroom across applicable budgets and constraints.
    pub headroom: Headroom,
    /// Capability modifications for allowed-with-modifications decisions.
    pub overrides: ActionOverrides,
}

impl Decision {
    /// A plain allow.
    #[must_use]
    pub fn allow(kind: DecisionKind) -> Self {
        Self {
            kind,
            allowed: true,
            action: DecisionAction::Allow,
            reason: None,
            warnings: Vec::new(),
            headroom: Headroom::default(),
            overrides: ActionOverrides::default(),
        }
    }

    /// A rejection (run must not be admitted).
    #[must_use]
    pub fn reject(kind: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            allowed: false,
            action: DecisionAction::Reject,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            headroom: Headroom::default(),
            overrides: ActionOverrides::default(),
        }
    }

    /// A halt (in-flight run must stop at the next opportunity).
    #[must_use]
    pub fn halt(kind: DecisionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            allowed: false,
            action: DecisionAction::Halt,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            headroom: Headroom::default(),
            overrides: ActionOverrides::default(),
        }
    }

    /// Append a warning (builder-style).
    #[must_use]
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Set the headroom (builder-style).
    #[must_use]
    pub fn with_headroom(mut self, headroom: Headroom) -> Self {
        self.headroom = headroom;
        self
    }
}

/// Decision for `before_model_call`, carrying the model the runtime must
/// actually use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDecision {
    /// The common decision fields.
    #[serde(flatten)]
    pub decision: Decision,
    /// The model the runtime must call. Equals the requested model unless
    /// a downgrade fired.
    pub effective_model: String,
    /// Token ceiling for this call, if any (stage config or limit action).
    pub max_tokens: Option<u32>,
    /// Whether routing replaced the requested model with a fallback.
    pub was_downgraded: bool,
}

impl ModelDecision {
    /// An allow that keeps the requested model untouched.
    #[must_use]
    pub fn passthrough(model: impl Into<String>) -> Self {
        Self {
            decision: Decision::allow(DecisionKind::Model),
            effective_model: model.into(),
            max_tokens: None,
            was_downgraded: false,
        }
    }

    /// Whether the call may proceed.
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }
}
