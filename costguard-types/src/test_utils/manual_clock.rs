//! ManualClock — a settable clock for window-boundary tests.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// A clock that only moves when told to.
///
/// Period-reset tests pin it to one side of a window boundary, record
/// usage, then advance it across the boundary and observe the reset.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Create a clock frozen at an RFC 3339 timestamp. Panics on a bad
    /// literal — this is test scaffolding.
    pub fn at_str(ts: &str) -> Self {
        Self::at(ts.parse().expect("valid RFC 3339 timestamp"))
    }

    /// Jump to a specific instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    /// Move forward by a duration.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_put_until_advanced() {
        let clock = ManualClock::at_str("2026-03-02T10:30:00Z");
        assert_eq!(clock.now(), clock.now());
        clock.advance(Duration::minutes(30));
        assert_eq!(clock.now(), "2026-03-02T11:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn set_jumps_backwards_too() {
        let clock = ManualClock::at_str("2026-03-02T10:30:00Z");
        clock.set("2026-01-01T00:00:00Z".parse().unwrap());
        assert_eq!(clock.now(), "2026-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }
}
