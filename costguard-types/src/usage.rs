//! Usage reports — what the runtime tells us after model and tool calls.

use crate::context::Stage;
use serde::{Deserialize, Serialize};

/// Token usage of one completed model call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelUsage {
    /// The model that was actually called.
    pub model: String,
    /// Stage label of the call, when the runtime knows it.
    pub stage: Option<Stage>,
    /// Prompt tokens, including cached tokens.
    pub prompt_tokens: u64,
    /// Completion tokens.
    pub completion_tokens: u64,
    /// Portion of prompt tokens served from the provider's cache.
    pub cached_tokens: u64,
    /// Reasoning/thinking tokens, when the provider reports them.
    pub reasoning_tokens: u64,
    /// Wall-clock latency of the call, when the runtime measures it.
    pub latency_ms: Option<f64>,
}

impl ModelUsage {
    /// A usage report with just model and token counts.
    pub fn new(model: impl Into<String>, prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            model: model.into(),
            prompt_tokens,
            completion_tokens,
            ..Default::default()
        }
    }
}

/// Usage of one completed tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolUsage {
    /// The tool that was invoked.
    pub tool: String,
    /// Bytes of input passed to the tool.
    pub input_bytes: u64,
    /// Bytes of output produced by the tool.
    pub output_bytes: u64,
}

impl ToolUsage {
    /// A usage report for a named tool.
    pub fn new(tool: impl Into<String>, input_bytes: u64, output_bytes: u64) -> Self {
        Self {
            tool: tool.into(),
            input_bytes,
            output_bytes,
        }
    }
}

/// Terminal and non-terminal states of a run, as tracked by accounting.
///
/// Once a run leaves [`RunStatus::Running`], further accounting against it
/// is a warned no-op.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Admitted and accumulating usage.
    Running,
    /// Ended normally via `on_run_end`.
    Completed,
    /// Ended with a host-reported failure.
    Failed,
    /// Stopped by a halt decision.
    Halted,
    /// Never admitted.
    Rejected,
}

impl RunStatus {
    /// The status name as emitted in telemetry attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Halted => "halted",
            RunStatus::Rejected => "rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_usage_defaults_are_zero() {
        let u = ModelUsage::new("gpt-4o", 1000, 200);
        assert_eq!(u.cached_tokens, 0);
        assert_eq!(u.reasoning_tokens, 0);
        assert!(u.stage.is_none());
    }

    #[test]
    fn run_status_names_are_stable() {
        assert_eq!(RunStatus::Completed.as_str(), "completed");
        assert_eq!(RunStatus::Halted.as_str(), "halted");
        let json = serde_json::to_string(&RunStatus::Rejected).unwrap();
        assert_eq!(json, "\"rejected\"");
    }
}
