//! Reservation engine

use chrono::{DateTime, Duration, Utc};
use lessonbook_api::{
    ActorRole, Approval, CancelOutcome, CancelReason, Cancellation, ChargeOutcome, LessonSession,
    LessonSlot, Payment, PaymentStatus, RefundAssessment, RequestContext, Reservation,
    ReservationStatus, SlotAvailability, TimeRange,
};
use lessonbook_config::{ChargingPolicy, Settings};
use lessonbook_gateway_api::{
    ChargeReceipt, ChargeRequest, GatewayError, GatewayResult, Notification, Notifier,
    PaymentGateway,
};
use lessonbook_store::{AuditEvent, AuditEventType, ChargeCommit, Store};
use lessonbook_util::{MAX_HOURLY_RATE, ReservationId, SlotId};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    CancellationCheck, CancellationPolicy, EpochResolver, PolicyEpoch, ReservationError,
    ReservationResult,
};

/// Gateway idempotency key for a reservation's single capture
pub fn charge_idempotency_key(reservation_id: &ReservationId) -> String {
    format!("charge-{}", reservation_id)
}

/// Mentor input for a new slot
#[derive(Debug, Clone)]
pub struct NewSlot {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub hourly_rate: i64,
    pub currency: String,
    pub min_hours: u32,
    pub max_hours: u32,
}

/// The reservation engine
pub struct ReservationEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) policy: CancellationPolicy,
    pub(crate) epochs: EpochResolver,
    pub(crate) charging: ChargingPolicy,
}

impl ReservationEngine {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn Store>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        info!(
            gateway = gateway.name(),
            policy_cutover = %settings.charging.policy_cutover,
            lead_time_minutes = settings.charging.lead_time.num_minutes(),
            grace_period_minutes = settings.charging.grace_period.num_minutes(),
            "Reservation engine initialized"
        );

        Self {
            store,
            gateway,
            notifier,
            policy: CancellationPolicy::new(settings.cancellation),
            epochs: EpochResolver::new(settings.charging.policy_cutover),
            charging: settings.charging.clone(),
        }
    }

    pub fn policy(&self) -> &CancellationPolicy {
        &self.policy
    }

    pub fn epochs(&self) -> &EpochResolver {
        &self.epochs
    }

    // Slots

    /// Publish a bookable slot owned by the calling mentor
    pub fn publish_slot(
        &self,
        ctx: &RequestContext,
        new: NewSlot,
        now: DateTime<Utc>,
    ) -> ReservationResult<LessonSlot> {
        if ctx.role != ActorRole::Mentor {
            return Err(ReservationError::PermissionDenied(
                "only mentors publish slots".into(),
            ));
        }

        let range = TimeRange::new(new.start_time, new.end_time).ok_or_else(|| {
            ReservationError::InvalidRange("slot must end after it starts".into())
        })?;
        if new.hourly_rate <= 0 || new.hourly_rate > MAX_HOURLY_RATE {
            return Err(ReservationError::InvalidAmount(format!(
                "hourly rate must be within 1..={}, got {}",
                MAX_HOURLY_RATE, new.hourly_rate
            )));
        }
        if new.min_hours == 0 || new.min_hours > new.max_hours {
            return Err(ReservationError::InvalidRange(format!(
                "invalid booking length bounds {}..{} hours",
                new.min_hours, new.max_hours
            )));
        }
        if range.duration() < Duration::hours(i64::from(new.min_hours)) {
            return Err(ReservationError::InvalidRange(
                "slot is shorter than the minimum booking".into(),
            ));
        }

        let slot = LessonSlot {
            id: SlotId::new(),
            teacher_id: ctx.actor_id.clone(),
            start_time: new.start_time,
            end_time: new.end_time,
            hourly_rate: new.hourly_rate,
            currency: new.currency,
            min_hours: new.min_hours,
            max_hours: new.max_hours,
            is_available: true,
            created_at: now,
        };
        self.store.insert_slot(&slot)?;

        self.audit(
            AuditEventType::SlotPublished {
                slot_id: slot.id.clone(),
                teacher_id: slot.teacher_id.clone(),
            },
            now,
        );
        info!(slot_id = %slot.id, teacher_id = %slot.teacher_id, "Slot published");

        Ok(slot)
    }

    /// Open or close a slot for new bookings. Existing reservations are untouched.
    pub fn set_slot_availability(
        &self,
        ctx: &RequestContext,
        slot_id: &SlotId,
        available: bool,
    ) -> ReservationResult<LessonSlot> {
        let slot = self.load_slot(slot_id)?;
        let owns = ctx.role == ActorRole::Mentor && slot.teacher_id == ctx.actor_id;
        if !owns && !ctx.is_admin() {
            return Err(ReservationError::PermissionDenied(
                "only the slot's mentor can change its availability".into(),
            ));
        }

        if !self.store.set_slot_available(slot_id, available)? {
            return Err(ReservationError::not_found("slot", slot_id));
        }
        debug!(slot_id = %slot_id, available, "Slot availability changed");

        self.load_slot(slot_id)
    }

    /// Booked ranges and bookable gaps of a slot
    pub fn slot_availability(
        &self,
        slot_id: &SlotId,
        now: DateTime<Utc>,
    ) -> ReservationResult<SlotAvailability> {
        let slot = self.load_slot(slot_id)?;
        let booked: Vec<TimeRange> = self
            .store
            .active_reservations_for_slot(slot_id)?
            .iter()
            .map(Reservation::booked_range)
            .collect();

        let min_len = Duration::hours(i64::from(slot.min_hours));
        let mut open = Vec::new();
        let mut push_gap = |start, end| {
            if let Some(gap) = TimeRange::new(start, end) {
                if gap.duration() >= min_len {
                    open.push(gap);
                }
            }
        };

        let mut cursor = slot.start_time.max(now);
        for range in &booked {
            if range.start > cursor {
                push_gap(cursor, range.start);
            }
            cursor = cursor.max(range.end);
        }
        push_gap(cursor, slot.end_time);

        Ok(SlotAvailability {
            slot_id: slot.id,
            is_available: slot.is_available,
            booked,
            open,
            as_of: now,
        })
    }

    // Reservations

    /// Book part of a slot. The new reservation waits for mentor approval.
    pub fn book_reservation(
        &self,
        ctx: &RequestContext,
        slot_id: &SlotId,
        range: TimeRange,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ReservationResult<Reservation> {
        if ctx.role != ActorRole::Student {
            return Err(ReservationError::PermissionDenied(
                "only students book lessons".into(),
            ));
        }

        let slot = self.load_slot(slot_id)?;
        if !slot.is_available {
            return Err(ReservationError::SlotUnavailable(format!(
                "slot {} is closed for booking",
                slot.id
            )));
        }
        if range.start >= range.end {
            return Err(ReservationError::InvalidRange(
                "booking must end after it starts".into(),
            ));
        }
        if !slot.range().contains(&range) {
            return Err(ReservationError::InvalidRange(
                "booking lies outside the slot".into(),
            ));
        }
        if range.start <= now {
            return Err(ReservationError::InvalidRange(
                "booking must start in the future".into(),
            ));
        }

        let minutes = range.minutes();
        let min_minutes = i64::from(slot.min_hours) * 60;
        let max_minutes = i64::from(slot.max_hours) * 60;
        if minutes < min_minutes || minutes > max_minutes {
            return Err(ReservationError::InvalidRange(format!(
                "booking of {} minutes is outside {}..{} hours",
                minutes, slot.min_hours, slot.max_hours
            )));
        }

        let total_amount = slot.price_for(minutes).ok_or_else(|| {
            ReservationError::InvalidAmount(format!(
                "price of {} minutes at {} per hour overflows",
                minutes, slot.hourly_rate
            ))
        })?;

        let reservation = Reservation {
            id: ReservationId::new(),
            slot_id: slot.id.clone(),
            student_id: ctx.actor_id.clone(),
            booked_start_time: range.start,
            booked_end_time: range.end,
            total_amount,
            currency: slot.currency.clone(),
            status: ReservationStatus::PendingApproval,
            payment_id: None,
            notes,
            approval: None,
            cancellation: None,
            created_at: now,
            updated_at: now,
        };

        if !self.store.insert_reservation_if_free(&reservation)? {
            return Err(ReservationError::SlotUnavailable(
                "requested time overlaps an existing reservation".into(),
            ));
        }

        self.audit(
            AuditEventType::ReservationBooked {
                reservation_id: reservation.id.clone(),
                slot_id: reservation.slot_id.clone(),
                student_id: reservation.student_id.clone(),
                total_amount: reservation.total_amount,
            },
            now,
        );
        info!(
            reservation_id = %reservation.id,
            slot_id = %reservation.slot_id,
            student_id = %reservation.student_id,
            total_amount = reservation.total_amount,
            "Reservation booked"
        );

        Ok(reservation)
    }

    /// Mentor approval: attach a payment method, no funds move.
    ///
    /// Legacy-epoch lessons are charged immediately after approval.
    pub async fn approve_reservation(
        &self,
        ctx: &RequestContext,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> ReservationResult<Reservation> {
        let reservation = self.load_reservation(id)?;
        if reservation.status != ReservationStatus::PendingApproval {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                action: "approve",
            });
        }

        let slot = self.load_slot(&reservation.slot_id)?;
        let owns = ctx.role == ActorRole::Mentor && slot.teacher_id == ctx.actor_id;
        if !owns && !ctx.is_admin() {
            return Err(ReservationError::PermissionDenied(
                "only the slot's mentor can approve".into(),
            ));
        }

        let conflicts = self.store.find_student_conflicts(
            &reservation.student_id,
            &reservation.booked_range(),
            &reservation.id,
        )?;
        if let Some(conflict) = conflicts.first() {
            return Err(ReservationError::StudentScheduleConflict(conflict.id.clone()));
        }

        let payment = self.pending_payment(&reservation, now)?;

        let reservation_ref = reservation.id.to_string();
        let method_ref = match self
            .bounded(
                self.gateway
                    .attach_payment_method(reservation.student_id.as_str(), &reservation_ref),
            )
            .await
        {
            Ok(method_ref) => method_ref,
            Err(e) => {
                warn!(
                    reservation_id = %reservation.id,
                    error = %e,
                    "Payment method attach failed; reservation left pending"
                );
                return Err(e.into());
            }
        };

        let approval = Approval {
            approved_at: now,
            approved_by: ctx.actor_id.clone(),
        };
        if !self
            .store
            .approve_reservation(id, &payment.id, &method_ref, &approval)?
        {
            let current = self.load_reservation(id)?;
            return Err(ReservationError::InvalidTransition {
                from: current.status,
                action: "approve",
            });
        }

        let epoch = self.epochs.resolve(reservation.booked_start_time);
        self.audit(
            AuditEventType::ReservationApproved {
                reservation_id: reservation.id.clone(),
                approved_by: ctx.actor_id.clone(),
                legacy_flow: epoch == PolicyEpoch::Legacy,
            },
            now,
        );
        info!(
            reservation_id = %reservation.id,
            approved_by = %ctx.actor_id,
            epoch = ?epoch,
            "Reservation approved"
        );

        if epoch == PolicyEpoch::Legacy {
            let approved = self.load_reservation(id)?;
            let payment = self
                .store
                .get_payment(&payment.id)?
                .ok_or_else(|| ReservationError::not_found("payment", &payment.id))?;
            let outcome = self.charge(&approved, &payment, now).await?;
            info!(reservation_id = %id, outcome = ?outcome, "Legacy flow charged at approval");
        }

        self.load_reservation(id)
    }

    /// Capture the payment of one APPROVED reservation.
    ///
    /// Losing the claim to another caller is reported as [`ChargeOutcome::ClaimLost`].
    pub async fn execute_charge(
        &self,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> ReservationResult<ChargeOutcome> {
        let reservation = self.load_reservation(id)?;
        if reservation.status != ReservationStatus::Approved {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                action: "charge",
            });
        }

        let payment = self
            .store
            .get_payment_for_reservation(id)?
            .ok_or_else(|| ReservationError::not_found("payment for reservation", id))?;
        if payment.status != PaymentStatus::SetupCompleted {
            return Err(ReservationError::InvalidPaymentState {
                status: payment.status,
                action: "charge",
            });
        }

        self.charge(&reservation, &payment, now).await
    }

    /// Claim, call the gateway once, record the result.
    pub(crate) async fn charge(
        &self,
        reservation: &Reservation,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> ReservationResult<ChargeOutcome> {
        if !self.store.claim_charge(&payment.id, now)? {
            debug!(reservation_id = %reservation.id, payment_id = %payment.id, "Charge claim lost");
            return Ok(ChargeOutcome::ClaimLost);
        }
        self.audit(
            AuditEventType::ChargeClaimed {
                reservation_id: reservation.id.clone(),
                payment_id: payment.id.clone(),
            },
            now,
        );

        let Some(method_ref) = payment.payment_method_ref.clone() else {
            return self
                .record_charge_failure(reservation, payment, "no payment method attached", now)
                .await;
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("reservation_id".to_string(), reservation.id.to_string());
        metadata.insert("student_id".to_string(), reservation.student_id.to_string());
        let request = ChargeRequest {
            payment_method_ref: method_ref,
            amount: payment.amount,
            currency: payment.currency.clone(),
            idempotency_key: charge_idempotency_key(&reservation.id),
            metadata,
        };

        let receipt = match self.bounded(self.gateway.charge(&request)).await {
            Ok(receipt) => receipt,
            Err(e) => {
                return self
                    .record_charge_failure(reservation, payment, &e.to_string(), now)
                    .await;
            }
        };

        let session = LessonSession::scheduled_for(reservation);
        let commit = match self
            .store
            .complete_charge(&payment.id, &receipt.charge_ref, &session, now)
        {
            Ok(commit) => commit,
            Err(e) => {
                self.report_unrecorded_charge(reservation, payment, &receipt, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        match commit {
            ChargeCommit::NotClaimed => {
                let message = format!(
                    "payment {} captured as {} but not recorded",
                    payment.id, receipt.charge_ref
                );
                self.report_unrecorded_charge(reservation, payment, &receipt, &message)
                    .await;
                Err(ReservationError::Inconsistent(message))
            }
            ChargeCommit::Confirmed => {
                self.audit(
                    AuditEventType::ChargeSucceeded {
                        reservation_id: reservation.id.clone(),
                        payment_id: payment.id.clone(),
                        amount: receipt.amount,
                        charge_ref: receipt.charge_ref.clone(),
                    },
                    now,
                );
                info!(
                    reservation_id = %reservation.id,
                    payment_id = %payment.id,
                    amount = receipt.amount,
                    charge_ref = %receipt.charge_ref,
                    "Charge captured; reservation confirmed"
                );
                self.notify(Notification::ReservationConfirmed {
                    reservation_id: reservation.id.clone(),
                    amount: receipt.amount,
                    currency: receipt.currency.clone(),
                })
                .await;

                Ok(ChargeOutcome::Charged {
                    charge_ref: receipt.charge_ref,
                })
            }
            ChargeCommit::ReservationNotApproved => {
                self.audit(
                    AuditEventType::ChargeSucceeded {
                        reservation_id: reservation.id.clone(),
                        payment_id: payment.id.clone(),
                        amount: receipt.amount,
                        charge_ref: receipt.charge_ref.clone(),
                    },
                    now,
                );
                error!(
                    reservation_id = %reservation.id,
                    payment_id = %payment.id,
                    charge_ref = %receipt.charge_ref,
                    "Charge captured after the reservation was canceled"
                );

                let fee = self
                    .store
                    .get_reservation(&reservation.id)?
                    .and_then(|r| r.cancellation)
                    .map(|c| c.fee)
                    .unwrap_or(0);
                self.notify(Notification::ChargedAfterCancellation {
                    reservation_id: reservation.id.clone(),
                    payment_id: payment.id.clone(),
                    amount: receipt.amount,
                })
                .await;
                self.notify(Notification::RefundDue {
                    reservation_id: reservation.id.clone(),
                    payment_id: payment.id.clone(),
                    refund_amount: (receipt.amount - fee).max(0),
                })
                .await;

                Ok(ChargeOutcome::ChargedAfterCancellation {
                    charge_ref: receipt.charge_ref,
                })
            }
        }
    }

    /// The reservation's PENDING payment, created on first approval attempt.
    /// A retried or concurrent approval reuses the row already there.
    fn pending_payment(
        &self,
        reservation: &Reservation,
        now: DateTime<Utc>,
    ) -> ReservationResult<Payment> {
        let payment = match self.store.get_payment_for_reservation(&reservation.id)? {
            Some(p) => p,
            None => {
                let p = Payment::pending_for(reservation, now);
                if self.store.insert_payment(&p)? {
                    return Ok(p);
                }
                self.store
                    .get_payment_for_reservation(&reservation.id)?
                    .ok_or_else(|| ReservationError::not_found("payment for", &reservation.id))?
            }
        };

        if payment.status != PaymentStatus::Pending {
            return Err(ReservationError::InvalidPaymentState {
                status: payment.status,
                action: "set up",
            });
        }
        Ok(payment)
    }

    /// Money moved at the gateway but the store does not say so. The claim
    /// stays consumed, so this is the only signal an operator gets.
    async fn report_unrecorded_charge(
        &self,
        reservation: &Reservation,
        payment: &Payment,
        receipt: &ChargeReceipt,
        error: &str,
    ) {
        error!(
            reservation_id = %reservation.id,
            payment_id = %payment.id,
            charge_ref = %receipt.charge_ref,
            error,
            "Captured funds could not be recorded"
        );
        self.notify(Notification::ChargeUnrecorded {
            reservation_id: reservation.id.clone(),
            payment_id: payment.id.clone(),
            charge_ref: receipt.charge_ref.clone(),
            amount: receipt.amount,
            error: error.to_string(),
        })
        .await;
    }

    async fn record_charge_failure(
        &self,
        reservation: &Reservation,
        payment: &Payment,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ReservationResult<ChargeOutcome> {
        if !self.store.fail_charge(&payment.id, reason, now)? {
            warn!(payment_id = %payment.id, "Failed charge could not be recorded on the payment");
        }

        error!(
            reservation_id = %reservation.id,
            payment_id = %payment.id,
            error = %reason,
            "Scheduled charge failed; manual resolution required"
        );
        self.audit(
            AuditEventType::ChargeFailed {
                reservation_id: reservation.id.clone(),
                payment_id: payment.id.clone(),
                error: reason.to_string(),
            },
            now,
        );
        self.notify(Notification::ChargeFailed {
            reservation_id: reservation.id.clone(),
            payment_id: payment.id.clone(),
            error: reason.to_string(),
        })
        .await;

        Ok(ChargeOutcome::Failed {
            error: reason.to_string(),
        })
    }

    /// Preview a cancellation without applying it
    pub fn check_cancellation(
        &self,
        ctx: &RequestContext,
        id: &ReservationId,
        reason: Option<CancelReason>,
        now: DateTime<Utc>,
    ) -> ReservationResult<CancellationCheck> {
        let reservation = self.load_reservation(id)?;
        self.authorize_participant(ctx, &reservation)?;

        Ok(self.policy.check(
            ctx.role,
            reservation.booked_start_time,
            reservation.total_amount,
            reason,
            now,
        ))
    }

    pub async fn cancel_reservation(
        &self,
        ctx: &RequestContext,
        id: &ReservationId,
        reason: CancelReason,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> ReservationResult<CancelOutcome> {
        let reservation = self.load_reservation(id)?;
        if reservation.status.is_terminal() {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                action: "cancel",
            });
        }
        self.authorize_participant(ctx, &reservation)?;

        if !CancellationPolicy::is_valid_reason(reason, ctx.role) {
            return Err(ReservationError::InvalidCancelReason {
                reason,
                role: ctx.role,
            });
        }

        let start = reservation.booked_start_time;
        let check = self.policy.check(
            ctx.role,
            start,
            reservation.total_amount,
            Some(reason),
            now,
        );
        if !check.can_cancel {
            let deadline = self.policy.deadline(ctx.role, start).unwrap_or(start);
            info!(
                reservation_id = %id,
                role = %ctx.role,
                deadline = %deadline,
                fee = check.fee,
                "Cancellation refused after deadline"
            );
            return Err(ReservationError::CancelWindowExpired {
                fee: check.fee,
                deadline,
            });
        }

        let cancellation = Cancellation {
            canceled_at: now,
            canceled_by: ctx.actor_id.clone(),
            reason,
            fee: check.fee,
            notes,
        };
        if !self
            .store
            .cancel_reservation(id, reservation.status, &cancellation)?
        {
            let current = self.load_reservation(id)?;
            return Err(ReservationError::InvalidTransition {
                from: current.status,
                action: "cancel",
            });
        }

        let refund = match self.store.get_payment_for_reservation(id)? {
            Some(payment) if payment.status == PaymentStatus::Charged => Some(RefundAssessment {
                payment_id: payment.id.clone(),
                charged_amount: payment.amount,
                fee: check.fee,
                refund_amount: (payment.amount - check.fee).max(0),
            }),
            _ => None,
        };

        self.audit(
            AuditEventType::ReservationCanceled {
                reservation_id: id.clone(),
                canceled_by: ctx.actor_id.clone(),
                role: ctx.role,
                reason,
                fee: check.fee,
            },
            now,
        );
        info!(
            reservation_id = %id,
            canceled_by = %ctx.actor_id,
            role = %ctx.role,
            reason = %reason,
            fee = check.fee,
            "Reservation canceled"
        );

        self.notify(Notification::ReservationCanceled {
            reservation_id: id.clone(),
            canceled_by: ctx.actor_id.to_string(),
            reason: reason.to_string(),
            fee: check.fee,
        })
        .await;
        if let Some(refund) = &refund {
            self.notify(Notification::RefundDue {
                reservation_id: id.clone(),
                payment_id: refund.payment_id.clone(),
                refund_amount: refund.refund_amount,
            })
            .await;
        }

        Ok(CancelOutcome {
            reservation_id: id.clone(),
            status: ReservationStatus::Canceled,
            fee_charged: check.fee,
            refund,
        })
    }

    // Lessons

    /// Mentor marks a confirmed lesson as started
    pub fn start_lesson(
        &self,
        ctx: &RequestContext,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> ReservationResult<LessonSession> {
        let reservation = self.load_reservation(id)?;
        if reservation.status != ReservationStatus::Confirmed {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                action: "start",
            });
        }

        let slot = self.load_slot(&reservation.slot_id)?;
        let owns = ctx.role == ActorRole::Mentor && slot.teacher_id == ctx.actor_id;
        if !owns && !ctx.is_admin() {
            return Err(ReservationError::PermissionDenied(
                "only the slot's mentor can start the lesson".into(),
            ));
        }

        if !self.store.start_session(id, now)? {
            return Err(ReservationError::not_found("scheduled lesson session for", id));
        }

        self.audit(
            AuditEventType::LessonStarted {
                reservation_id: id.clone(),
            },
            now,
        );
        info!(reservation_id = %id, "Lesson started");

        self.store
            .get_session_for_reservation(id)?
            .ok_or_else(|| ReservationError::not_found("lesson session for", id))
    }

    /// CONFIRMED -> COMPLETED once the booked end has passed. Does not touch payments.
    pub fn mark_completed(
        &self,
        id: &ReservationId,
        now: DateTime<Utc>,
    ) -> ReservationResult<Reservation> {
        let reservation = self.load_reservation(id)?;
        if reservation.status != ReservationStatus::Confirmed {
            return Err(ReservationError::InvalidTransition {
                from: reservation.status,
                action: "complete",
            });
        }
        if now < reservation.booked_end_time {
            return Err(ReservationError::LessonNotEnded {
                ends_at: reservation.booked_end_time,
            });
        }

        if !self.store.complete_reservation(id, now)? {
            let current = self.load_reservation(id)?;
            return Err(ReservationError::InvalidTransition {
                from: current.status,
                action: "complete",
            });
        }

        self.audit(
            AuditEventType::ReservationCompleted {
                reservation_id: id.clone(),
            },
            now,
        );
        info!(reservation_id = %id, "Reservation completed");

        self.load_reservation(id)
    }

    // Refunds

    /// Record a refund an operator has executed outside the system
    pub fn record_refund(
        &self,
        ctx: &RequestContext,
        reservation_id: &ReservationId,
        amount: i64,
        now: DateTime<Utc>,
    ) -> ReservationResult<Payment> {
        if !ctx.is_admin() {
            return Err(ReservationError::PermissionDenied(
                "only admins record refunds".into(),
            ));
        }

        let payment = self
            .store
            .get_payment_for_reservation(reservation_id)?
            .ok_or_else(|| ReservationError::not_found("payment for reservation", reservation_id))?;
        if payment.status != PaymentStatus::Charged {
            return Err(ReservationError::InvalidPaymentState {
                status: payment.status,
                action: "refund",
            });
        }
        if amount <= 0 || amount > payment.amount {
            return Err(ReservationError::InvalidAmount(format!(
                "refund of {} outside 1..={}",
                amount, payment.amount
            )));
        }

        if !self.store.record_refund(&payment.id, amount, now)? {
            let status = self
                .store
                .get_payment(&payment.id)?
                .map(|p| p.status)
                .unwrap_or(payment.status);
            return Err(ReservationError::InvalidPaymentState {
                status,
                action: "refund",
            });
        }

        self.audit(
            AuditEventType::RefundRecorded {
                payment_id: payment.id.clone(),
                amount,
                recorded_by: ctx.actor_id.clone(),
            },
            now,
        );
        info!(payment_id = %payment.id, amount, recorded_by = %ctx.actor_id, "Refund recorded");

        self.store
            .get_payment(&payment.id)?
            .ok_or_else(|| ReservationError::not_found("payment", &payment.id))
    }

    // Helpers

    pub(crate) fn load_reservation(&self, id: &ReservationId) -> ReservationResult<Reservation> {
        self.store
            .get_reservation(id)?
            .ok_or_else(|| ReservationError::not_found("reservation", id))
    }

    fn load_slot(&self, id: &SlotId) -> ReservationResult<LessonSlot> {
        self.store
            .get_slot(id)?
            .ok_or_else(|| ReservationError::not_found("slot", id))
    }

    /// The booking student, the slot's mentor, or an admin
    fn authorize_participant(
        &self,
        ctx: &RequestContext,
        reservation: &Reservation,
    ) -> ReservationResult<()> {
        let allowed = match ctx.role {
            ActorRole::Student => reservation.student_id == ctx.actor_id,
            ActorRole::Mentor => self.load_slot(&reservation.slot_id)?.teacher_id == ctx.actor_id,
            ActorRole::Admin => true,
        };

        if allowed {
            Ok(())
        } else {
            Err(ReservationError::PermissionDenied(format!(
                "{} {} is not a participant of reservation {}",
                ctx.role, ctx.actor_id, reservation.id
            )))
        }
    }

    /// Gateway call under the configured timeout. A timeout is an error.
    async fn bounded<T>(&self, call: impl Future<Output = GatewayResult<T>>) -> GatewayResult<T> {
        match tokio::time::timeout(self.charging.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.charging.timeout)),
        }
    }

    pub(crate) fn audit(&self, event: AuditEventType, now: DateTime<Utc>) {
        if let Err(e) = self.store.append_audit(AuditEvent::at(event, now)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    /// Delivery failures are logged and never block a transition
    pub(crate) async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(error = %e, "Notification delivery failed");
        }
    }
}
