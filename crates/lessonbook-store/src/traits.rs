//! Store trait definitions

use chrono::{DateTime, Utc};
use lessonbook_api::{
    Approval, Cancellation, LessonSession, LessonSlot, Payment, Reservation, ReservationStatus,
    TimeRange,
};
use lessonbook_util::{ChargeWindow, PaymentId, ReservationId, SlotId, UserId};

use crate::{AuditEvent, StoreResult};

/// Main store trait.
///
/// Every status mutation is a conditional update: it names the state it
/// expects to leave and returns `false` when the row has already moved on.
pub trait Store: Send + Sync {
    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Slots

    fn insert_slot(&self, slot: &LessonSlot) -> StoreResult<()>;

    fn get_slot(&self, id: &SlotId) -> StoreResult<Option<LessonSlot>>;

    /// Returns `false` if the slot does not exist
    fn set_slot_available(&self, id: &SlotId, available: bool) -> StoreResult<bool>;

    // Reservations

    /// Insert unless a non-canceled reservation on the same slot overlaps.
    /// The overlap check and the insert happen in one transaction.
    fn insert_reservation_if_free(&self, reservation: &Reservation) -> StoreResult<bool>;

    fn get_reservation(&self, id: &ReservationId) -> StoreResult<Option<Reservation>>;

    /// Active reservations on a slot, ordered by start
    fn active_reservations_for_slot(&self, slot_id: &SlotId) -> StoreResult<Vec<Reservation>>;

    /// APPROVED or CONFIRMED reservations of `student_id` overlapping `range`
    fn find_student_conflicts(
        &self,
        student_id: &UserId,
        range: &TimeRange,
        exclude: &ReservationId,
    ) -> StoreResult<Vec<Reservation>>;

    /// PENDING_APPROVAL -> APPROVED together with PENDING -> SETUP_COMPLETED
    fn approve_reservation(
        &self,
        id: &ReservationId,
        payment_id: &PaymentId,
        payment_method_ref: &str,
        approval: &Approval,
    ) -> StoreResult<bool>;

    /// `expected` -> CANCELED, cancelling any open lesson session
    fn cancel_reservation(
        &self,
        id: &ReservationId,
        expected: ReservationStatus,
        cancellation: &Cancellation,
    ) -> StoreResult<bool>;

    /// CONFIRMED -> COMPLETED, closing the lesson session
    fn complete_reservation(&self, id: &ReservationId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// CONFIRMED reservations whose booked end is at or before `now`
    fn find_finished_reservations(&self, now: DateTime<Utc>) -> StoreResult<Vec<ReservationId>>;

    // Payments

    /// Insert a PENDING payment and link it from its reservation.
    /// Returns false, changing nothing, if the reservation already has a payment.
    fn insert_payment(&self, payment: &Payment) -> StoreResult<bool>;

    fn get_payment(&self, id: &PaymentId) -> StoreResult<Option<Payment>>;

    fn get_payment_for_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> StoreResult<Option<Payment>>;

    /// APPROVED reservations with an unclaimed SETUP_COMPLETED payment whose
    /// booked start lies in `window`
    fn find_charge_candidates(&self, window: &ChargeWindow) -> StoreResult<Vec<ChargeCandidate>>;

    /// Compare-and-set of `charge_executed_at` from NULL to `at`.
    ///
    /// Succeeds only while the payment is SETUP_COMPLETED and its reservation
    /// is APPROVED. Exactly one caller can ever win.
    fn claim_charge(&self, payment_id: &PaymentId, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Record a captured charge: payment CHARGED, reservation CONFIRMED and
    /// `session` scheduled, in one transaction
    fn complete_charge(
        &self,
        payment_id: &PaymentId,
        charge_ref: &str,
        session: &LessonSession,
        at: DateTime<Utc>,
    ) -> StoreResult<ChargeCommit>;

    /// Claimed payment -> FAILED. The claim stays consumed.
    fn fail_charge(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// CHARGED -> REFUNDED
    fn record_refund(
        &self,
        payment_id: &PaymentId,
        amount: i64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // Lesson sessions

    fn get_session_for_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> StoreResult<Option<LessonSession>>;

    /// SCHEDULED -> IN_PROGRESS
    fn start_session(&self, reservation_id: &ReservationId, at: DateTime<Utc>)
    -> StoreResult<bool>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// A reservation the sweep may try to charge, with its payment
#[derive(Debug, Clone)]
pub struct ChargeCandidate {
    pub reservation: Reservation,
    pub payment: Payment,
}

/// What [`Store::complete_charge`] committed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeCommit {
    /// Payment CHARGED, reservation CONFIRMED, session scheduled
    Confirmed,
    /// Payment CHARGED but the reservation had left APPROVED
    ReservationNotApproved,
    /// Nothing written: the payment was not a claimed SETUP_COMPLETED row
    NotClaimed,
}
