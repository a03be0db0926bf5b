//! Mock payment gateway for testing

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ChargeReceipt, ChargeRequest, GatewayError, GatewayResult, PaymentGateway};

/// Mock gateway for unit/integration testing
pub struct MockGateway {
    next_id: AtomicU64,
    attach_calls: AtomicU64,
    charges: Arc<Mutex<Vec<ChargeRequest>>>,

    /// Configure attach to fail
    pub fail_attach: Arc<Mutex<bool>>,

    /// Configure charge to be declined
    pub fail_charge: Arc<Mutex<bool>>,

    /// Delay before a charge returns (simulates a slow gateway)
    pub charge_delay: Arc<Mutex<Option<Duration>>>,

    /// Delay before an attach returns
    pub attach_delay: Arc<Mutex<Option<Duration>>>,

    /// Reported by `is_healthy`
    pub healthy: Arc<Mutex<bool>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            attach_calls: AtomicU64::new(0),
            charges: Arc::new(Mutex::new(Vec::new())),
            fail_attach: Arc::new(Mutex::new(false)),
            fail_charge: Arc::new(Mutex::new(false)),
            charge_delay: Arc::new(Mutex::new(None)),
            attach_delay: Arc::new(Mutex::new(None)),
            healthy: Arc::new(Mutex::new(true)),
        }
    }

    pub fn set_fail_attach(&self, fail: bool) {
        *self.fail_attach.lock().unwrap() = fail;
    }

    pub fn set_fail_charge(&self, fail: bool) {
        *self.fail_charge.lock().unwrap() = fail;
    }

    pub fn set_charge_delay(&self, delay: Option<Duration>) {
        *self.charge_delay.lock().unwrap() = delay;
    }

    pub fn set_attach_delay(&self, delay: Option<Duration>) {
        *self.attach_delay.lock().unwrap() = delay;
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap() = healthy;
    }

    pub fn attach_calls(&self) -> u64 {
        self.attach_calls.load(Ordering::SeqCst)
    }

    /// Every charge request received, including declined ones
    pub fn charge_requests(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        _reservation_ref: &str,
    ) -> GatewayResult<String> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.attach_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_attach.lock().unwrap() {
            return Err(GatewayError::Unavailable("Mock attach failure".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("pm_mock_{}_{}", customer_ref, id))
    }

    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeReceipt> {
        self.charges.lock().unwrap().push(request.clone());

        let delay = *self.charge_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if *self.fail_charge.lock().unwrap() {
            return Err(GatewayError::Declined("Mock charge failure".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ChargeReceipt {
            charge_ref: format!("ch_mock_{}", id),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }

    fn is_healthy(&self) -> bool {
        *self.healthy.lock().unwrap()
    }
}
