//! Policy epochs
//!
//! Lessons starting after the cutover use deferred charging. Lessons at or
//! before it keep the legacy behavior of charging when the mentor approves.

use chrono::{DateTime, Utc};
use lessonbook_util::default_policy_cutover;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyEpoch {
    /// Charge at approval
    Legacy,
    /// Attach at approval, charge shortly before the lesson
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochResolver {
    cutover: DateTime<Utc>,
}

impl EpochResolver {
    pub fn new(cutover: DateTime<Utc>) -> Self {
        Self { cutover }
    }

    pub fn cutover(&self) -> DateTime<Utc> {
        self.cutover
    }

    /// Strictly after the cutover; a lesson starting exactly on it is legacy
    pub fn is_new_flow(&self, lesson_start: DateTime<Utc>) -> bool {
        lesson_start > self.cutover
    }

    pub fn resolve(&self, lesson_start: DateTime<Utc>) -> PolicyEpoch {
        if self.is_new_flow(lesson_start) {
            PolicyEpoch::Deferred
        } else {
            PolicyEpoch::Legacy
        }
    }
}

impl Default for EpochResolver {
    fn default() -> Self {
        Self::new(default_policy_cutover())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, TimeZone};

    #[test]
    fn cutover_is_midnight_jst() {
        let jst = FixedOffset::east_opt(9 * 3600).unwrap();
        let midnight = jst.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();
        assert_eq!(EpochResolver::default().cutover(), midnight.with_timezone(&Utc));
    }

    #[test]
    fn boundary_is_legacy() {
        let resolver = EpochResolver::default();
        let cutover = resolver.cutover();

        assert_eq!(resolver.resolve(cutover), PolicyEpoch::Legacy);
        assert_eq!(resolver.resolve(cutover - Duration::hours(1)), PolicyEpoch::Legacy);
        assert_eq!(
            resolver.resolve(cutover + Duration::seconds(1)),
            PolicyEpoch::Deferred
        );
    }
}
