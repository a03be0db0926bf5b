//! Role-aware cancellation policy
//!
//! Every function here is pure: it depends only on the role, the lesson
//! start, the amount, the reason and the `now` passed in.

use chrono::{DateTime, Duration, Utc};
use lessonbook_api::{ActorRole, CancelReason};
use lessonbook_config::CancellationWindows;
use lessonbook_util::{hours_until, minutes_until};
use serde::{Deserialize, Serialize};

/// Time left before a role's free-cancellation cutoff.
///
/// The cutoff is inclusive: at exactly zero minutes remaining `can_cancel`
/// is still true, the same answer [`CancellationPolicy::can_cancel`] gives.
/// Past the cutoff `hours` goes negative and `minutes` stays in `0..60`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineInfo {
    pub hours: i64,
    /// Always in `0..60`; negative totals borrow from `hours`
    pub minutes: i64,
    pub can_cancel: bool,
}

/// Result of evaluating a cancellation request without applying it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationCheck {
    pub can_cancel: bool,
    pub fee: i64,
    /// Only present when the request is currently allowed
    pub deadline: Option<DeadlineInfo>,
}

/// Human-facing summary of one role's rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDetails {
    pub role: ActorRole,
    /// `None` for admins, who have no cutoff
    pub deadline_hours: Option<i64>,
    pub allowed_reasons: Vec<CancelReason>,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationPolicy {
    student_deadline_hours: i64,
    mentor_deadline_hours: i64,
}

impl CancellationPolicy {
    pub fn new(windows: CancellationWindows) -> Self {
        Self {
            student_deadline_hours: windows.student_deadline_hours,
            mentor_deadline_hours: windows.mentor_deadline_hours,
        }
    }

    /// Hours before the lesson at which free cancellation closes
    pub fn deadline_hours(&self, role: ActorRole) -> Option<i64> {
        match role {
            ActorRole::Student => Some(self.student_deadline_hours),
            ActorRole::Mentor => Some(self.mentor_deadline_hours),
            ActorRole::Admin => None,
        }
    }

    /// Absolute cutoff instant for `role`. `None` for admins, or when the
    /// cutoff falls outside the representable range.
    pub fn deadline(&self, role: ActorRole, lesson_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let hours = Duration::try_hours(self.deadline_hours(role)?)?;
        lesson_start.checked_sub_signed(hours)
    }

    pub fn can_cancel(
        &self,
        role: ActorRole,
        lesson_start: DateTime<Utc>,
        reason: Option<CancelReason>,
        now: DateTime<Utc>,
    ) -> bool {
        if reason.is_some_and(|r| r.bypasses_deadline()) {
            return true;
        }

        match self.deadline_hours(role) {
            Some(deadline) => hours_until(lesson_start, now) >= deadline,
            None => true,
        }
    }

    /// Fee owed for cancelling now. Binary for students: nothing inside the
    /// free window, the full amount outside it.
    pub fn calculate_fee(
        &self,
        role: ActorRole,
        lesson_start: DateTime<Utc>,
        total_amount: i64,
        reason: Option<CancelReason>,
        now: DateTime<Utc>,
    ) -> i64 {
        if reason.is_some_and(|r| r.bypasses_deadline()) {
            return 0;
        }
        if reason == Some(CancelReason::MentorRequest) {
            return 0;
        }

        match role {
            ActorRole::Student => {
                if hours_until(lesson_start, now) >= self.student_deadline_hours {
                    0
                } else {
                    total_amount
                }
            }
            ActorRole::Mentor | ActorRole::Admin => 0,
        }
    }

    pub fn time_until_deadline(
        &self,
        role: ActorRole,
        lesson_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> DeadlineInfo {
        let Some(deadline) = self.deadline_hours(role) else {
            return DeadlineInfo {
                hours: 0,
                minutes: 0,
                can_cancel: true,
            };
        };

        let remaining =
            minutes_until(lesson_start, now).saturating_sub(deadline.saturating_mul(60));
        DeadlineInfo {
            hours: remaining.div_euclid(60),
            minutes: remaining.rem_euclid(60),
            // agrees with can_cancel: whole hours >= deadline iff whole minutes >= deadline * 60
            can_cancel: remaining >= 0,
        }
    }

    pub fn is_valid_reason(reason: CancelReason, role: ActorRole) -> bool {
        match role {
            ActorRole::Student => matches!(
                reason,
                CancelReason::StudentRequest | CancelReason::Emergency
            ),
            ActorRole::Mentor => {
                matches!(reason, CancelReason::MentorRequest | CancelReason::Emergency)
            }
            ActorRole::Admin => true,
        }
    }

    /// Eligibility, fee and remaining time in one call
    pub fn check(
        &self,
        role: ActorRole,
        lesson_start: DateTime<Utc>,
        total_amount: i64,
        reason: Option<CancelReason>,
        now: DateTime<Utc>,
    ) -> CancellationCheck {
        let can_cancel = self.can_cancel(role, lesson_start, reason, now);
        CancellationCheck {
            can_cancel,
            fee: self.calculate_fee(role, lesson_start, total_amount, reason, now),
            deadline: can_cancel.then(|| self.time_until_deadline(role, lesson_start, now)),
        }
    }

    pub fn policy_details(&self, role: ActorRole) -> PolicyDetails {
        let allowed_reasons = CancelReason::ALL
            .into_iter()
            .filter(|r| Self::is_valid_reason(*r, role))
            .collect();

        let description = match role {
            ActorRole::Student => format!(
                "Free cancellation until {} hours before the lesson; the full amount is charged after that. Emergencies are always free.",
                self.student_deadline_hours
            ),
            ActorRole::Mentor => format!(
                "Cancellation allowed until {} hours before the lesson at no cost to the student. Emergencies are always allowed.",
                self.mentor_deadline_hours
            ),
            ActorRole::Admin => "Admins may cancel at any time without a fee.".to_string(),
        };

        PolicyDetails {
            role,
            deadline_hours: self.deadline_hours(role),
            allowed_reasons,
            description,
        }
    }
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self::new(CancellationWindows::default())
    }
}
