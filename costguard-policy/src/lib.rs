//! Policy model and store for the costguard sidecar.
//!
//! Budgets and routing policies are declarative records loaded from a
//! pluggable [`PolicySource`], cached as immutable snapshots in a
//! [`PolicyStore`], and resolved against a run's
//! `(tenant, strand, workflow)` context by wildcard matching with
//! priority scoring.
//!
//! All matching budgets apply concurrently (each is tracked as its own
//! accumulator); routing is winner-takes-all by priority, ties broken by
//! load order.

#![deny(missing_docs)]

pub mod budget;
pub mod matching;
pub mod routing;
pub mod source;
pub mod store;

pub use budget::{BudgetConstraints, BudgetSpec, HardLimitAction, ThresholdAction};
pub use matching::{MatchPatterns, Pattern};
pub use routing::{DowngradeTrigger, RoutingPolicy, StageConfig};
pub use source::{EnvPolicySource, FilePolicySource, PolicyDocuments, PolicySource};
pub use store::{PolicySnapshot, PolicyStore};
