//! Persistent entities

use chrono::{DateTime, Utc};
use lessonbook_util::{PaymentId, ReservationId, SessionId, SlotId, UserId};
use serde::{Deserialize, Serialize};

use crate::{CancelReason, PaymentStatus, ReservationStatus, SessionStatus, TimeRange};

/// Mentor-published availability window.
///
/// Amounts are integer minor units of `currency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSlot {
    pub id: SlotId,
    pub teacher_id: UserId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hourly_rate: i64,
    pub currency: String,
    pub min_hours: u32,
    pub max_hours: u32,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
}

impl LessonSlot {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// Price of `minutes` of this slot, rounded down to a whole minor unit.
    /// `None` if the amount does not fit in an `i64`.
    pub fn price_for(&self, minutes: i64) -> Option<i64> {
        self.hourly_rate.checked_mul(minutes).map(|cost| cost / 60)
    }
}

/// Mentor sign-off on a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_at: DateTime<Utc>,
    pub approved_by: UserId,
}

/// Bookkeeping recorded when a reservation is canceled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    pub canceled_at: DateTime<Utc>,
    pub canceled_by: UserId,
    pub reason: CancelReason,
    pub fee: i64,
    pub notes: Option<String>,
}

/// A student's booking of a time range inside a slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub slot_id: SlotId,
    pub student_id: UserId,
    pub booked_start_time: DateTime<Utc>,
    pub booked_end_time: DateTime<Utc>,
    pub total_amount: i64,
    pub currency: String,
    pub status: ReservationStatus,
    pub payment_id: Option<PaymentId>,
    pub notes: Option<String>,
    pub approval: Option<Approval>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn booked_range(&self) -> TimeRange {
        TimeRange {
            start: self.booked_start_time,
            end: self.booked_end_time,
        }
    }
}

/// Financial side-channel of a reservation (1:1)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub reservation_id: ReservationId,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    /// Opaque reusable credential issued by the gateway
    pub payment_method_ref: Option<String>,
    /// Set exactly once, when a charge attempt is claimed
    pub charge_executed_at: Option<DateTime<Utc>>,
    pub gateway_charge_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub refund_amount: Option<i64>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// New payment record for a reservation whose method is not attached yet
    pub fn pending_for(reservation: &Reservation, now: DateTime<Utc>) -> Self {
        Self {
            id: PaymentId::new(),
            reservation_id: reservation.id.clone(),
            amount: reservation.total_amount,
            currency: reservation.currency.clone(),
            status: PaymentStatus::Pending,
            payment_method_ref: None,
            charge_executed_at: None,
            gateway_charge_ref: None,
            failure_reason: None,
            refund_amount: None,
            refunded_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_claimed(&self) -> bool {
        self.charge_executed_at.is_some()
    }
}

/// A realized lesson, created when its reservation is confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonSession {
    pub id: SessionId,
    pub reservation_id: ReservationId,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub notes: Option<String>,
    pub feedback: Option<String>,
}

impl LessonSession {
    pub fn scheduled_for(reservation: &Reservation) -> Self {
        Self {
            id: SessionId::new(),
            reservation_id: reservation.id.clone(),
            scheduled_start: reservation.booked_start_time,
            scheduled_end: reservation.booked_end_time,
            actual_start: None,
            actual_end: None,
            status: SessionStatus::Scheduled,
            notes: None,
            feedback: None,
        }
    }
}
