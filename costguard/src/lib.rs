#![deny(missing_docs)]
//! # costguard — umbrella crate
//!
//! Provides a single import surface for the costguard sidecar.
//! Re-exports the component crates behind feature flags, plus a
//! `prelude` for the happy path.

pub use costguard_guard;
pub use costguard_policy;
pub use costguard_pricing;
pub use costguard_routing;
pub use costguard_tracker;
pub use costguard_types;

#[cfg(feature = "otel")]
pub use costguard_otel;
#[cfg(feature = "store-memory")]
pub use costguard_store_memory;

/// Happy-path imports for embedding the sidecar.
pub mod prelude {
    pub use costguard_guard::{CostGuard, FailureMode, GuardConfig};

    pub use costguard_policy::{
        BudgetSpec, EnvPolicySource, FilePolicySource, PolicySource, RoutingPolicy,
    };

    pub use costguard_types::{
        BudgetStore, Clock, Decision, DecisionAction, DecisionKind, MetricsEmitter, ModelDecision,
        ModelUsage, RunContext, RunId, RunStatus, Stage, SystemClock, ToolUsage,
    };

    pub use costguard_pricing::PricingTable;

    #[cfg(feature = "otel")]
    pub use costguard_otel::TracingEmitter;

    #[cfg(feature = "store-memory")]
    pub use costguard_store_memory::MemoryBudgetStore;
}
