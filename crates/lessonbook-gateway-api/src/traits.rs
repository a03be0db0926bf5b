//! Gateway traits

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors from payment gateway operations
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Card declined: {0}")]
    Declined(String),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// A single capture against a previously attached payment method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub payment_method_ref: String,
    /// Integer minor units
    pub amount: i64,
    pub currency: String,
    /// Same key, same charge: the gateway must not capture twice
    pub idempotency_key: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Gateway acknowledgement of a captured charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub charge_ref: String,
    pub amount: i64,
    pub currency: String,
}

/// Payment gateway capable of holding a reusable, non-charged credential
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Attach a reusable payment method for `customer_ref`. No funds move.
    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        reservation_ref: &str,
    ) -> GatewayResult<String>;

    /// Capture funds against an attached payment method
    async fn charge(&self, request: &ChargeRequest) -> GatewayResult<ChargeReceipt>;

    /// Optional: check if the gateway is reachable
    fn is_healthy(&self) -> bool {
        true
    }
}
