//! Period window arithmetic.
//!
//! Windows are half-open `[start, end)` intervals aligned to wall-clock
//! UTC boundaries: hourly at XX:00, daily at 00:00, weekly at Monday
//! 00:00, monthly at the first of the month 00:00. At exactly
//! `now == period_end` the next window has already begun.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use costguard_types::BudgetPeriod;

/// A concrete accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl PeriodWindow {
    /// The window containing `now` for the given period.
    pub fn containing(period: BudgetPeriod, now: DateTime<Utc>) -> Self {
        match period {
            BudgetPeriod::Hourly => {
                let start = now
                    .with_minute(0)
                    .and_then(|t| t.with_second(0))
                    .and_then(|t| t.with_nanosecond(0))
                    .expect("truncating to the hour is always valid");
                Self {
                    start,
                    end: start + Duration::hours(1),
                }
            }
            BudgetPeriod::Daily => {
                let start = midnight(now.date_naive());
                Self {
                    start,
                    end: start + Duration::days(1),
                }
            }
            BudgetPeriod::Weekly => {
                let days_from_monday = now.weekday().num_days_from_monday() as i64;
                let start = midnight(now.date_naive() - Duration::days(days_from_monday));
                Self {
                    start,
                    end: start + Duration::weeks(1),
                }
            }
            BudgetPeriod::Monthly => {
                let start_date = now.date_naive().with_day(1).expect("day 1 always exists");
                let next_month = if start_date.month() == 12 {
                    NaiveDate::from_ymd_opt(start_date.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(start_date.year(), start_date.month() + 1, 1)
                }
                .expect("first of a month always exists");
                Self {
                    start: midnight(start_date),
                    end: midnight(next_month),
                }
            }
        }
    }

    /// Whether `now` has left this window. True exactly at `end`.
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight always exists"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn hourly_window_truncates_to_the_hour() {
        let w = PeriodWindow::containing(BudgetPeriod::Hourly, at("2026-03-02T10:30:45Z"));
        assert_eq!(w.start, at("2026-03-02T10:00:00Z"));
        assert_eq!(w.end, at("2026-03-02T11:00:00Z"));
    }

    #[test]
    fn daily_window_is_utc_midnight_to_midnight() {
        let w = PeriodWindow::containing(BudgetPeriod::Daily, at("2026-03-02T23:59:59Z"));
        assert_eq!(w.start, at("2026-03-02T00:00:00Z"));
        assert_eq!(w.end, at("2026-03-03T00:00:00Z"));
    }

    #[test]
    fn weekly_window_starts_monday() {
        // 2026-03-02 is a Monday.
        let monday = at("2026-03-02T00:00:00Z");
        for probe in [
            "2026-03-02T00:00:00Z",
            "2026-03-04T12:00:00Z",
            "2026-03-08T23:59:59Z",
        ] {
            let w = PeriodWindow::containing(BudgetPeriod::Weekly, at(probe));
            assert_eq!(w.start, monday, "probe {probe}");
            assert_eq!(w.end, at("2026-03-09T00:00:00Z"));
        }
        assert_eq!(monday.weekday(), Weekday::Mon);
    }

    #[test]
    fn monthly_window_handles_year_rollover() {
        let w = PeriodWindow::containing(BudgetPeriod::Monthly, at("2026-12-31T23:00:00Z"));
        assert_eq!(w.start, at("2026-12-01T00:00:00Z"));
        assert_eq!(w.end, at("2027-01-01T00:00:00Z"));
    }

    #[test]
    fn window_is_inclusive_start_exclusive_end() {
        let w = PeriodWindow::containing(BudgetPeriod::Hourly, at("2026-03-02T10:30:00Z"));
        assert!(!w.expired(at("2026-03-02T10:59:59Z")));
        // Exactly at the boundary the new period has started.
        assert!(w.expired(at("2026-03-02T11:00:00Z")));

        let next = PeriodWindow::containing(BudgetPeriod::Hourly, at("2026-03-02T11:00:00Z"));
        assert_eq!(next.start, at("2026-03-02T11:00:00Z"));
    }

    #[test]
    fn consecutive_windows_partition_the_timeline() {
        for period in [
            BudgetPeriod::Hourly,
            BudgetPeriod::Daily,
            BudgetPeriod::Weekly,
            BudgetPeriod::Monthly,
        ] {
            let w = PeriodWindow::containing(period, at("2026-02-28T13:45:00Z"));
            let next = PeriodWindow::containing(period, w.end);
            assert_eq!(next.start, w.end, "{period}");
        }
    }

    mod properties {
        use super::*;
        use chrono::TimeZone;
        use proptest::prelude::*;

        proptest! {
            // Every instant falls inside exactly the window computed for
            // it, and the window is stable for all instants within it.
            #[test]
            fn window_contains_its_instant(
                secs in 1_600_000_000i64..2_500_000_000i64,
                period_idx in 0usize..4,
            ) {
                let period = [
                    BudgetPeriod::Hourly,
                    BudgetPeriod::Daily,
                    BudgetPeriod::Weekly,
                    BudgetPeriod::Monthly,
                ][period_idx];
                let now = Utc.timestamp_opt(secs, 0).unwrap();
                let w = PeriodWindow::containing(period, now);
                prop_assert!(w.start <= now);
                prop_assert!(now < w.end);
                prop_assert_eq!(PeriodWindow::containing(period, w.start), w);
            }
        }
    }
}
