//! Policy constants shared across crates
//!
//! These are the built-in defaults. The daemon configuration can override
//! every one of them.

use chrono::{DateTime, Duration, Utc};

/// How far ahead of a lesson start the deferred charge is executed
pub const CHARGE_LEAD_TIME_MINUTES: i64 = 120;

/// How far behind `now` a sweep still looks, to absorb late invocations
pub const GRACE_PERIOD_MINUTES: i64 = 5;

/// Students may cancel for free up to this many hours before the lesson
pub const STUDENT_CANCEL_HOURS: i64 = 24;

/// Mentors may cancel up to this many hours before the lesson
pub const MENTOR_CANCEL_HOURS: i64 = 2;

/// Bounded time for a single gateway call
pub const GATEWAY_TIMEOUT_SECS: u64 = 30;

/// Largest hourly rate a slot may be published with, in minor units
pub const MAX_HOURLY_RATE: i64 = 100_000_000;

/// Upper bound for configured lead and grace periods (one week)
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

/// Upper bound for configured cancellation deadlines (90 days)
pub const MAX_DEADLINE_HOURS: i64 = 90 * 24;

/// Lessons starting strictly after this instant use the deferred-charge flow.
///
/// 2025-06-03 00:00 JST, i.e. 2025-06-02 15:00 UTC.
pub const POLICY_CUTOVER: &str = "2025-06-02T15:00:00Z";

const POLICY_CUTOVER_UNIX: i64 = 1_748_876_400;

pub fn charge_lead_time() -> Duration {
    Duration::minutes(CHARGE_LEAD_TIME_MINUTES)
}

pub fn grace_period() -> Duration {
    Duration::minutes(GRACE_PERIOD_MINUTES)
}

/// [`POLICY_CUTOVER`] as an instant
pub fn default_policy_cutover() -> DateTime<Utc> {
    DateTime::from_timestamp(POLICY_CUTOVER_UNIX, 0).unwrap_or_default()
}
