//! Results of the exposed operations

use chrono::{DateTime, Utc};
use lessonbook_util::{ChargeWindow, PaymentId, ReservationId, SlotId};
use serde::{Deserialize, Serialize};

use crate::{ReservationStatus, TimeRange};

/// Result of a successful cancellation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub reservation_id: ReservationId,
    pub status: ReservationStatus,
    pub fee_charged: i64,
    /// Present when funds had already been captured
    pub refund: Option<RefundAssessment>,
}

/// Amount owed back to the student after a cancellation.
///
/// Refunds are executed by an operator; this is the figure they act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundAssessment {
    pub payment_id: PaymentId,
    pub charged_amount: i64,
    pub fee: i64,
    pub refund_amount: i64,
}

/// Outcome of one charge attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChargeOutcome {
    /// Funds captured and the reservation confirmed
    Charged { charge_ref: String },

    /// Funds captured but the reservation was canceled while in flight
    ChargedAfterCancellation { charge_ref: String },

    /// The gateway declined, errored, or timed out
    Failed { error: String },

    /// Another run already claimed this payment
    ClaimLost,
}

/// Summary of one deferred charge sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub window: ChargeWindow,
    /// Candidates returned by the scan
    pub scanned: usize,
    /// Legacy-epoch candidates left alone
    pub skipped_legacy: usize,
    /// Claims won by this run
    pub claimed: usize,
    pub charged: usize,
    pub failed: usize,
    /// Claims lost to a concurrent run
    pub lost: usize,
    /// Candidates that hit a store or consistency error
    pub errors: usize,
}

impl SweepReport {
    pub fn empty(window: ChargeWindow) -> Self {
        Self {
            window,
            scanned: 0,
            skipped_legacy: 0,
            claimed: 0,
            charged: 0,
            failed: 0,
            lost: 0,
            errors: 0,
        }
    }

    pub fn record(&mut self, outcome: &ChargeOutcome) {
        match outcome {
            ChargeOutcome::Charged { .. } | ChargeOutcome::ChargedAfterCancellation { .. } => {
                self.claimed += 1;
                self.charged += 1;
            }
            ChargeOutcome::Failed { .. } => {
                self.claimed += 1;
                self.failed += 1;
            }
            ChargeOutcome::ClaimLost => self.lost += 1,
        }
    }
}

/// Derived capacity view of a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAvailability {
    pub slot_id: SlotId,
    pub is_available: bool,
    /// Ranges held by active reservations, sorted by start
    pub booked: Vec<TimeRange>,
    /// Gaps at least `min_hours` long that can still be booked
    pub open: Vec<TimeRange>,
    pub as_of: DateTime<Utc>,
}

impl SlotAvailability {
    pub fn has_capacity(&self) -> bool {
        self.is_available && !self.open.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn sweep_report_tallies_outcomes() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap();
        let window = ChargeWindow::around(now, Duration::minutes(120), Duration::minutes(5));
        let mut report = SweepReport::empty(window);

        report.record(&ChargeOutcome::Charged {
            charge_ref: "ch_1".into(),
        });
        report.record(&ChargeOutcome::Failed {
            error: "declined".into(),
        });
        report.record(&ChargeOutcome::ClaimLost);

        assert_eq!(report.claimed, 2);
        assert_eq!(report.charged, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.lost, 1);
    }
}
