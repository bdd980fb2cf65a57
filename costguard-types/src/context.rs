//! Run identity and the stage vocabulary for model calls.

use crate::id::{RunId, StrandId, TenantId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable identity of one agent run.
///
/// Created once at admission and referenced by `run_id` for the rest of
/// the run's life. The metadata bag is carried verbatim into telemetry
/// attributes (`strands.metadata.*`).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunContext {
    /// Organization paying for this run.
    pub tenant_id: TenantId,
    /// Agent type executing this run.
    pub strand_id: StrandId,
    /// Task flow this run belongs to.
    pub workflow_id: WorkflowId,
    /// Unique identifier of this execution.
    pub run_id: RunId,
    /// When the run was admitted.
    pub started_at: DateTime<Utc>,
    /// Free-form attribution metadata, forwarded to telemetry.
    pub metadata: BTreeMap<String, String>,
}

impl RunContext {
    /// Create a run context with an empty metadata bag.
    pub fn new(
        tenant_id: impl Into<TenantId>,
        strand_id: impl Into<StrandId>,
        workflow_id: impl Into<WorkflowId>,
        run_id: impl Into<RunId>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            strand_id: strand_id.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            started_at,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry (builder-style).
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Semantic label for a model call, driving stage-aware routing.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// High-level task planning.
    Planning,
    /// Choosing which tool to invoke next.
    ToolSelection,
    /// Producing the final answer.
    Synthesis,
    /// Anything that doesn't fit the named stages.
    Other,
}

impl Stage {
    /// The stage name as it appears in routing configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Planning => "planning",
            Stage::ToolSelection => "tool_selection",
            Stage::Synthesis => "synthesis",
            Stage::Other => "other",
        }
    }
}

impl std::str::FromStr for Stage {
    type Err = ();

    /// Unrecognized stage names map to [`Stage::Other`] rather than failing —
    /// routing config may name stages the runtime doesn't know yet.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "planning" => Stage::Planning,
            "tool_selection" => Stage::ToolSelection,
            "synthesis" => Stage::Synthesis,
            _ => Stage::Other,
        })
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builder_accumulates_metadata() {
        let ctx = RunContext::new("t", "s", "w", "r", Utc::now())
            .with_metadata("team", "ml-platform")
            .with_metadata("env", "prod");
        assert_eq!(ctx.metadata.len(), 2);
        assert_eq!(ctx.metadata["team"], "ml-platform");
    }

    #[test]
    fn stage_parses_known_and_unknown_names() {
        assert_eq!("synthesis".parse::<Stage>().unwrap(), Stage::Synthesis);
        assert_eq!("tool_selection".parse::<Stage>().unwrap(), Stage::ToolSelection);
        assert_eq!("does-not-exist".parse::<Stage>().unwrap(), Stage::Other);
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&Stage::ToolSelection).unwrap();
        assert_eq!(json, "\"tool_selection\"");
    }
}
