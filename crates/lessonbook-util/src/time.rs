//! Time utilities for lessonbook
//!
//! All instants are UTC. Deltas are computed as whole units truncated toward
//! zero, so a lesson 23h59m away is 23 hours away.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `LESSONBOOK_MOCK_TIME` environment variable can be set
//! to an RFC 3339 timestamp to shift the service clock. The shifted clock keeps
//! advancing at the real rate, which makes it possible to replay a charge
//! window without waiting for it.
//!
//! Example:
//! ```bash
//! LESSONBOOK_MOCK_TIME="2025-03-01T08:55:00Z" lessonbookd run
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "LESSONBOOK_MOCK_TIME";

static MOCK_TIME_OFFSET: OnceLock<Option<Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match DateTime::parse_from_rfc3339(&mock_time_str) {
                    Ok(mock_dt) => {
                        let offset = mock_dt.with_timezone(&Utc).signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(e) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            error = %e,
                            "Invalid mock time, expected RFC 3339"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current service time, respecting `LESSONBOOK_MOCK_TIME` in debug builds.
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Whole hours from `now` until `target`, truncated toward zero.
/// Negative once `target` has passed.
pub fn hours_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    target.signed_duration_since(now).num_hours()
}

/// Whole minutes from `now` until `target`, truncated toward zero.
pub fn minutes_until(target: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    target.signed_duration_since(now).num_minutes()
}

/// Closed interval of lesson start times eligible for a charge sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ChargeWindow {
    /// `[now - grace, now + lead]`, clamped to the representable range
    pub fn around(now: DateTime<Utc>, lead: Duration, grace: Duration) -> Self {
        Self {
            start: now.checked_sub_signed(grace).unwrap_or(DateTime::<Utc>::MIN_UTC),
            end: now.checked_add_signed(lead).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn hours_until_truncates() {
        let start = at(10, 0);
        assert_eq!(hours_until(start, at(8, 0)), 2);
        assert_eq!(hours_until(start, at(8, 1)), 1);
        assert_eq!(hours_until(start, at(9, 59)), 0);
        assert_eq!(hours_until(start, at(11, 30)), -1);
    }

    #[test]
    fn minutes_until_counts_whole_minutes() {
        assert_eq!(minutes_until(at(10, 0), at(8, 30)), 90);
        assert_eq!(minutes_until(at(10, 0), at(10, 15)), -15);
    }


    #[test]
    fn charge_window_bounds_are_inclusive() {
        let now = at(9, 0);
        let window = ChargeWindow::around(now, Duration::minutes(120), Duration::minutes(5));

        assert_eq!(window.start, at(8, 55));
        assert_eq!(window.end, at(11, 0));
        assert!(window.contains(at(8, 55)));
        assert!(window.contains(at(10, 0)));
        assert!(window.contains(at(11, 0)));
        assert!(!window.contains(at(8, 54)));
        assert!(!window.contains(at(11, 1)));
    }

    #[test]
    fn charge_window_clamps_instead_of_overflowing() {
        let window = ChargeWindow::around(at(9, 0), Duration::MAX, Duration::MAX);
        assert_eq!(window.start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(window.end, DateTime::<Utc>::MAX_UTC);
        assert!(window.contains(at(9, 0)));
    }
}
