//! # costguard-types — vocabulary for the costguard sidecar
//!
//! This crate defines the shared data model and the two narrow contracts
//! that the rest of the workspace composes around:
//!
//! | Piece | Types | What it does |
//! |-------|-------|-------------|
//! | Identity | [`TenantId`], [`StrandId`], [`WorkflowId`], [`RunId`] | The cost-attribution hierarchy |
//! | Context | [`RunContext`], [`Stage`] | What a run is, where a model call sits |
//! | Decisions | [`Decision`], [`ModelDecision`], [`DecisionAction`] | What every lifecycle hook returns |
//! | Usage | [`ModelUsage`], [`ToolUsage`] | What the runtime reports back |
//! | Persistence | [`BudgetStore`], [`BudgetStateData`] | Fleet-shared budget state |
//! | Telemetry | [`MetricsEmitter`], [`metrics`] | Monotonic counters, stable schema |
//! | Time | [`Clock`], [`SystemClock`] | Injectable wall clock |
//!
//! ## Design Principle
//!
//! User-visible outputs are **decisions**, not errors. A budget being
//! exhausted is a `Decision { allowed: false, .. }`; errors are reserved
//! for genuinely broken machinery (bad config, unreachable backend) and
//! even those fold into decisions at the pipeline boundary according to
//! the configured failure mode.
//!
//! ## Dependency Notes
//!
//! Costs are `rust_decimal::Decimal` throughout — budget arithmetic must
//! not accumulate binary-float drift across thousands of small charges.
//! Metadata bags are `BTreeMap<String, String>` so serialized context is
//! deterministic.

#![deny(missing_docs)]

pub mod clock;
pub mod context;
pub mod decision;
pub mod error;
pub mod id;
pub mod metrics;
pub mod scope;
pub mod store;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-exports for convenience
pub use clock::{Clock, SystemClock};
pub use context::{RunContext, Stage};
pub use decision::{ActionOverrides, Decision, DecisionAction, DecisionKind, Headroom, ModelDecision};
pub use error::{ConfigError, MetricsError, StoreError, TrackerError};
pub use id::{BudgetId, PolicyId, RunId, StrandId, TenantId, WorkflowId};
pub use metrics::MetricsEmitter;
pub use scope::{BudgetPeriod, BudgetScope, ScopeKey};
pub use store::{BudgetStateData, BudgetStore, CasOutcome, VersionedState};
pub use usage::{ModelUsage, RunStatus, ToolUsage};
