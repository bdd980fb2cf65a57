//! Error types for each concern.
//!
//! Budget exhaustion and constraint violations are deliberately NOT here:
//! they are decisions, not errors. These enums cover broken machinery —
//! invalid configuration, an unreachable backend, a violated internal
//! invariant — and the decision pipeline folds even those into decisions
//! according to the configured failure mode.

use crate::id::RunId;
use thiserror::Error;

/// Policy/pricing configuration errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A document failed structural validation.
    #[error("invalid config: {0}")]
    Invalid(String),

    /// The load source could not be read at all.
    #[error("config source unavailable: {0}")]
    SourceUnavailable(String),

    /// A document failed to parse.
    #[error("config parse error: {0}")]
    Parse(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Budget accounting errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TrackerError {
    /// An operation referenced a run the tracker doesn't know.
    /// On `after_*` hooks this is a warning and a no-op, not a failure.
    #[error("unknown run: {0}")]
    ContextUnknown(RunId),

    /// Internal bookkeeping reached a state it never should.
    /// Folded into a decision per the failure mode.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Persistent budget store errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached. Accounting degrades to in-memory.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A store call exceeded its deadline.
    #[error("store timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Serialization or deserialization of stored state failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Whether the backend may recover on its own and a retry is worthwhile.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Metrics emission errors. These are logged by the caller but never
/// surface to a lifecycle hook.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MetricsError {
    /// The emitter failed to record a counter.
    #[error("emit failed: {0}")]
    EmitFailed(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_retryability_split() {
        assert!(StoreError::Unavailable("conn refused".into()).is_retryable());
        assert!(StoreError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
        assert!(!StoreError::Serialization("bad json".into()).is_retryable());
    }

    #[test]
    fn messages_name_the_run() {
        let e = TrackerError::ContextUnknown(RunId::new("run-9"));
        assert!(e.to_string().contains("run-9"));
    }
}
