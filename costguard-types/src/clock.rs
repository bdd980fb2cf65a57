//! Injectable wall clock.
//!
//! Period windowing is pure arithmetic over "now"; injecting the clock
//! makes window resets and threshold boundaries testable without sleeping.

use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// Implementations:
/// - [`SystemClock`]: the real clock
/// - `test_utils::ManualClock`: settable, for window-boundary tests
pub trait Clock: Send + Sync {
    /// The current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn object_safety() {
        _assert_send_sync::<Box<dyn Clock>>();
        _assert_send_sync::<Arc<dyn Clock>>();
        let _: Arc<dyn Clock> = Arc::new(SystemClock);
    }

    #[test]
    fn system_clock_is_monotone_enough() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
