//! Budget accounting engine for the costguard sidecar.
//!
//! The [`BudgetTracker`] owns per-run and per-budget accounting state,
//! gates admissions, iterations, model and tool calls against the
//! applicable budgets, records priced usage, detects soft-threshold
//! crossings exactly once per period, and optionally shares accumulators
//! across a fleet through an optimistic persistent store.

#![deny(missing_docs)]

pub mod period;
mod persist;
pub mod state;
pub mod tracker;

pub use period::PeriodWindow;
pub use state::{BudgetState, RunState, ThresholdCrossing, UsageDelta};
pub use tracker::{
    AdmissionCheck, BudgetSnapshot, BudgetTracker, CloseOutcome, GateCheck, ModelCheck,
    RecordOutcome, RunSnapshot, TrackerConfig,
};
