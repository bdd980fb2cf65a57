//! Guard configuration.

use std::time::Duration;

/// What an internal failure turns into at the decision boundary.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Broken machinery yields an allowing decision with a warning.
    /// Cost governance should not take the product down with it.
    #[default]
    FailOpen,
    /// Broken machinery yields a rejection. For deployments where an
    /// unenforced budget is worse than a stalled run.
    FailClosed,
}

/// Tuning knobs for the decision pipeline.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// How internal failures surface in decisions.
    pub failure_mode: FailureMode,
    /// Include `strands.run_id` in metric attributes. High-cardinality;
    /// off by default.
    pub include_run_id: bool,
    /// Policy snapshot age that triggers a lazy reload.
    pub refresh_interval: Duration,
    /// CAS attempts before a persistent update degrades to in-memory.
    pub cas_max_attempts: u32,
    /// Ended runs retained for late usage reports.
    pub ended_retention: usize,
    /// How often the recovery task probes an unavailable store.
    pub store_probe_interval: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_mode: FailureMode::default(),
            include_run_id: false,
            refresh_interval: Duration::from_secs(300),
            cas_max_attempts: 8,
            ended_retention: 256,
            store_probe_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fail_open() {
        let config = GuardConfig::default();
        assert_eq!(config.failure_mode, FailureMode::FailOpen);
        assert!(!config.include_run_id);
        assert_eq!(config.cas_max_attempts, 8);
    }
}
