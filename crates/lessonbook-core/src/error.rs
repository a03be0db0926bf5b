//! Reservation engine errors

use chrono::{DateTime, Utc};
use lessonbook_api::{ActorRole, CancelReason, PaymentStatus, ReservationStatus};
use lessonbook_gateway_api::GatewayError;
use lessonbook_store::StoreError;
use lessonbook_util::ReservationId;
use thiserror::Error;

/// Errors surfaced by [`crate::ReservationEngine`]
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Slot unavailable: {0}")]
    SlotUnavailable(String),

    #[error("Cannot {action} a reservation in {from}")]
    InvalidTransition {
        from: ReservationStatus,
        action: &'static str,
    },

    #[error("Cannot {action} a payment in {status}")]
    InvalidPaymentState {
        status: PaymentStatus,
        action: &'static str,
    },

    #[error("Cancel reason {reason} is not allowed for {role}")]
    InvalidCancelReason {
        reason: CancelReason,
        role: ActorRole,
    },

    #[error("Free cancellation ended at {deadline}; fee would be {fee}")]
    CancelWindowExpired { fee: i64, deadline: DateTime<Utc> },

    #[error("Student already holds reservation {0} at an overlapping time")]
    StudentScheduleConflict(ReservationId),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Lesson has not ended yet (ends at {ends_at})")]
    LessonNotEnded { ends_at: DateTime<Utc> },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Inconsistent state: {0}")]
    Inconsistent(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type ReservationResult<T> = Result<T, ReservationError>;

/// How a caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected request; the user can change it or try again later
    UserRetryable,
    /// Something an operator has to look at
    OperatorAttention,
}

impl ReservationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReservationError::Inconsistent(_) | ReservationError::Store(_) => {
                ErrorKind::OperatorAttention
            }
            ReservationError::Gateway(GatewayError::Internal(_)) => ErrorKind::OperatorAttention,
            _ => ErrorKind::UserRetryable,
        }
    }

    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        ReservationError::NotFound(format!("{what} {id}"))
    }
}
