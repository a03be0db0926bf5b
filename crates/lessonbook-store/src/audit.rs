//! Audit event types

use chrono::{DateTime, Utc};
use lessonbook_api::{ActorRole, CancelReason};
use lessonbook_util::{PaymentId, ReservationId, SlotId, UserId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Configuration loaded
    ConfigLoaded { sweep_interval_secs: u64 },

    SlotPublished {
        slot_id: SlotId,
        teacher_id: UserId,
    },

    ReservationBooked {
        reservation_id: ReservationId,
        slot_id: SlotId,
        student_id: UserId,
        total_amount: i64,
    },

    ReservationApproved {
        reservation_id: ReservationId,
        approved_by: UserId,
        legacy_flow: bool,
    },

    /// A charge attempt won its claim
    ChargeClaimed {
        reservation_id: ReservationId,
        payment_id: PaymentId,
    },

    ChargeSucceeded {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        amount: i64,
        charge_ref: String,
    },

    /// Needs operator attention; never retried automatically
    ChargeFailed {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        error: String,
    },

    ReservationCanceled {
        reservation_id: ReservationId,
        canceled_by: UserId,
        role: ActorRole,
        reason: CancelReason,
        fee: i64,
    },

    LessonStarted { reservation_id: ReservationId },

    ReservationCompleted { reservation_id: ReservationId },

    RefundRecorded {
        payment_id: PaymentId,
        amount: i64,
        recorded_by: UserId,
    },

    SweepCompleted {
        scanned: usize,
        claimed: usize,
        charged: usize,
        failed: usize,
    },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self::at(event, lessonbook_util::now())
    }

    pub fn at(event: AuditEventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
