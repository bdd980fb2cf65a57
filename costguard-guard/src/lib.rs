//! Decision pipeline for the costguard sidecar.
//!
//! [`CostGuard`] is the object a host runtime embeds: eight lifecycle
//! hooks in, structured [`Decision`]s out. It owns the policy store, the
//! budget tracker, and the metrics emitter; routing and pricing are
//! consulted per hook.
//!
//! ```no_run
//! use costguard_guard::{CostGuard, FailureMode};
//! use costguard_policy::FilePolicySource;
//! use costguard_types::RunContext;
//!
//! # async fn demo() -> Result<(), costguard_types::ConfigError> {
//! let guard = CostGuard::builder(FilePolicySource::new("/etc/costguard"))
//!     .failure_mode(FailureMode::FailOpen)
//!     .build()
//!     .await?;
//!
//! let ctx = RunContext::new("acme", "researcher", "report", "run-1", chrono::Utc::now());
//! let decision = guard.on_run_start(&ctx).await;
//! if !decision.allowed {
//!     // The runtime must not start the run.
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod guard;

pub use config::{FailureMode, GuardConfig};
pub use guard::{CostGuard, CostGuardBuilder};

// Re-exported so hosts depending on this crate alone can type every
// hook argument and result.
pub use costguard_types::{
    Decision, DecisionAction, DecisionKind, ModelDecision, ModelUsage, RunContext, RunId,
    RunStatus, Stage, ToolUsage,
};
