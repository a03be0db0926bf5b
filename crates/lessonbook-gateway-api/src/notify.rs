//! Notification channel

use async_trait::async_trait;
use lessonbook_util::{PaymentId, ReservationId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Messages sent to students, mentors or operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ReservationConfirmed {
        reservation_id: ReservationId,
        amount: i64,
        currency: String,
    },

    ReservationCanceled {
        reservation_id: ReservationId,
        canceled_by: String,
        reason: String,
        fee: i64,
    },

    /// Scheduled capture failed; the reservation stays approved
    ChargeFailed {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        error: String,
    },

    /// Funds were captured for a reservation canceled mid-flight
    ChargedAfterCancellation {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        amount: i64,
    },

    RefundDue {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        refund_amount: i64,
    },

    /// Funds were captured but the payment record could not be updated
    ChargeUnrecorded {
        reservation_id: ReservationId,
        payment_id: PaymentId,
        charge_ref: String,
        amount: i64,
        error: String,
    },
}

impl Notification {
    /// Needs a human to act
    pub fn requires_operator(&self) -> bool {
        matches!(
            self,
            Notification::ChargeFailed { .. }
                | Notification::ChargedAfterCancellation { .. }
                | Notification::RefundDue { .. }
                | Notification::ChargeUnrecorded { .. }
        )
    }
}

/// Fire-and-forget delivery. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> NotifyResult<()>;
}

/// Writes notifications to the tracing log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> NotifyResult<()> {
        let payload = serde_json::to_string(&notification)
            .map_err(|e| NotifyError::Unavailable(e.to_string()))?;

        if notification.requires_operator() {
            warn!(notification = %payload, "Operator alert");
        } else {
            info!(notification = %payload, "Notification");
        }
        Ok(())
    }
}

/// Collects notifications in memory for tests
#[derive(Debug, Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,

    /// Configure delivery to fail
    pub fail: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut fail) = self.fail.lock() {
            *fail = failing;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> NotifyResult<()> {
        if self.fail.lock().map(|f| *f).unwrap_or(false) {
            return Err(NotifyError::Unavailable("recording notifier set to fail".into()));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_notifier_collects() {
        let notifier = RecordingNotifier::new();
        let n = Notification::ReservationConfirmed {
            reservation_id: ReservationId::new(),
            amount: 5000,
            currency: "JPY".into(),
        };

        notifier.notify(n.clone()).await.unwrap();
        assert_eq!(notifier.sent(), vec![n]);
    }

    #[tokio::test]
    async fn recording_notifier_can_fail() {
        let notifier = RecordingNotifier::new();
        notifier.set_failing(true);

        let result = notifier
            .notify(Notification::RefundDue {
                reservation_id: ReservationId::new(),
                payment_id: PaymentId::new(),
                refund_amount: 100,
            })
            .await;
        assert!(result.is_err());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn log_notifier_accepts_everything() {
        let notifier = LogNotifier;
        notifier
            .notify(Notification::ChargeFailed {
                reservation_id: ReservationId::new(),
                payment_id: PaymentId::new(),
                error: "declined".into(),
            })
            .await
            .unwrap();
    }

    #[test]
    fn operator_alerts() {
        let failed = Notification::ChargeFailed {
            reservation_id: ReservationId::new(),
            payment_id: PaymentId::new(),
            error: "declined".into(),
        };
        let confirmed = Notification::ReservationConfirmed {
            reservation_id: ReservationId::new(),
            amount: 1,
            currency: "JPY".into(),
        };
        assert!(failed.requires_operator());
        assert!(!confirmed.requires_operator());
    }
}
