//! In-process sandbox gateway
//!
//! Behaves like a real gateway from the engine's point of view: attached
//! methods are remembered, unknown methods are rejected, and a repeated
//! idempotency key returns the original receipt instead of charging again.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{ChargeReceipt, ChargeRequest, GatewayError, GatewayResult, PaymentGateway};

pub struct SandboxGateway {
    /// Customers whose charges are declined
    decline_customers: HashSet<String>,
    /// payment method ref -> customer ref
    methods: Mutex<HashMap<String, String>>,
    /// idempotency key -> receipt
    charges: Mutex<HashMap<String, ChargeReceipt>>,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::with_declines(std::iter::empty::<String>())
    }

    pub fn with_declines(customers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            decline_customers: customers.into_iter().map(Into::into).collect(),
            methods: Mutex::new(HashMap::new()),
            charges: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct captures performed
    pub fn charge_count(&self) -> usize {
        self.charges.lock().map(|c| c.len()).unwrap_or(0)
    }

    fn poisoned() -> GatewayError {
        GatewayError::Internal("sandbox state poisoned".into())
    }
}

impl Default for SandboxGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        reservation_ref: &str,
    ) -> GatewayResult<String> {
        if customer_ref.is_empty() {
            return Err(GatewayError::InvalidRequest("empty customer ref".into()));
        }

        let method_ref = format!("pm_sandbox_{}", Uuid::new_v4().simple());
        self.methods
            .lock()
            .map_err(|_| Self::poisoned())?
            .insert(method_ref.clone(), customer_ref.to_string());

        debug!(customer_ref, reservation_ref, method_ref = %method_ref, "Sandbox payment method attached");
        Ok(method_ref)
    }

    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeReceipt> {
        if request.amount <= 0 {
            return Err(GatewayError::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        if let Some(existing) = self
            .charges
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(&request.idempotency_key)
        {
            debug!(idempotency_key = %request.idempotency_key, "Sandbox replayed idempotent charge");
            return Ok(existing.clone());
        }

        let customer = self
            .methods
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(&request.payment_method_ref)
            .cloned()
            .ok_or_else(|| {
                GatewayError::InvalidRequest(format!(
                    "unknown payment method {}",
                    request.payment_method_ref
                ))
            })?;

        if self.decline_customers.contains(&customer) {
            return Err(GatewayError::Declined(format!(
                "sandbox declines customer {}",
                customer
            )));
        }

        let receipt = ChargeReceipt {
            charge_ref: format!("ch_sandbox_{}", Uuid::new_v4().simple()),
            amount: request.amount,
            currency: request.currency.clone(),
        };
        self.charges
            .lock()
            .map_err(|_| Self::poisoned())?
            .entry(request.idempotency_key.clone())
            .or_insert_with(|| receipt.clone());

        info!(
            charge_ref = %receipt.charge_ref,
            amount = receipt.amount,
            currency = %receipt.currency,
            "Sandbox charge captured"
        );
        Ok(receipt)
    }
}
