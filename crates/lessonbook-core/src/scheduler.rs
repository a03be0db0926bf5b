//! Deferred charge sweep and lesson completion
//!
//! Both entry points are safe to invoke on overlapping schedules: every
//! mutation goes through a conditional update, and a payment's charge claim
//! can be won exactly once.

use chrono::{DateTime, Utc};
use lessonbook_api::SweepReport;
use lessonbook_store::AuditEventType;
use lessonbook_util::ChargeWindow;
use tracing::{debug, error, info, warn};

use crate::{PolicyEpoch, ReservationEngine, ReservationResult};

impl ReservationEngine {
    /// Scan window for a sweep at `now`
    pub fn charge_window(&self, now: DateTime<Utc>) -> ChargeWindow {
        ChargeWindow::around(now, self.charging.lead_time, self.charging.grace_period)
    }

    /// Claim and charge every deferred-epoch reservation starting inside the window.
    ///
    /// Failed charges are recorded and alerted, never retried. Nothing is
    /// claimed while the gateway reports itself unhealthy.
    pub async fn run_deferred_charge_sweep(
        &self,
        now: DateTime<Utc>,
    ) -> ReservationResult<SweepReport> {
        let window = self.charge_window(now);
        if !self.gateway.is_healthy() {
            warn!(gateway = self.gateway.name(), "Payment gateway unhealthy, sweep skipped");
            return Ok(SweepReport::empty(window));
        }

        let candidates = self.store.find_charge_candidates(&window)?;
        let mut report = SweepReport::empty(window);
        report.scanned = candidates.len();

        for candidate in candidates {
            let reservation = &candidate.reservation;
            if self.epochs.resolve(reservation.booked_start_time) == PolicyEpoch::Legacy {
                debug!(reservation_id = %reservation.id, "Skipping legacy-epoch reservation");
                report.skipped_legacy += 1;
                continue;
            }

            match self.charge(reservation, &candidate.payment, now).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    error!(
                        reservation_id = %reservation.id,
                        error = %e,
                        "Charge attempt errored"
                    );
                    report.errors += 1;
                }
            }
        }

        if report.scanned > 0 {
            self.audit(
                AuditEventType::SweepCompleted {
                    scanned: report.scanned,
                    claimed: report.claimed,
                    charged: report.charged,
                    failed: report.failed,
                },
                now,
            );
        }
        info!(
            window_start = %window.start,
            window_end = %window.end,
            scanned = report.scanned,
            claimed = report.claimed,
            charged = report.charged,
            failed = report.failed,
            lost = report.lost,
            errors = report.errors,
            "Deferred charge sweep finished"
        );

        Ok(report)
    }

    /// Move every CONFIRMED reservation whose lesson has ended to COMPLETED.
    /// Returns how many were completed by this call.
    pub fn complete_finished_lessons(&self, now: DateTime<Utc>) -> ReservationResult<usize> {
        let finished = self.store.find_finished_reservations(now)?;
        let mut completed = 0;

        for id in finished {
            match self.mark_completed(&id, now) {
                Ok(_) => completed += 1,
                Err(e) => debug!(reservation_id = %id, error = %e, "Lesson not completed"),
            }
        }

        if completed > 0 {
            info!(completed, "Finished lessons completed");
        }
        Ok(completed)
    }
}
