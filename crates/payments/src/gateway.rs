//! Payment gateway port (card intents and hosted payment links).
//!
//! Amounts cross this boundary in the smallest currency unit. Implementations
//! live in `inflow-infra` (an HTTP adapter and a scripted in-process one).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use inflow_core::Currency;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    RequiresAction,
    RequiresConfirmation,
    RequiresPaymentMethod,
    Processing,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::Processing => "processing",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRequest {
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: Currency,
    pub customer_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Opaque challenge payload (3-D Secure redirect, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkLineItem {
    pub name: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub currency: Currency,
    pub line_items: Vec<LinkLineItem>,
    pub metadata: BTreeMap<String, String>,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway answered with a status that is neither success nor actionable.
    #[error("payment error with status {0}")]
    UnexpectedStatus(String),

    /// The card was declined or the request rejected.
    #[error("payment rejected: {0}")]
    Rejected(String),

    #[error("gateway transport failure: {0}")]
    Transport(String),

    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("unknown payment intent: {0}")]
    UnknownIntent(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(&self, request: IntentRequest) -> Result<PaymentIntent, GatewayError>;

    async fn confirm_payment_intent(
        &self,
        intent_id: &str,
        return_url: &str,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Reads the current intent state (used by the out-of-band confirm callback).
    async fn retrieve_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn create_payment_link(&self, request: LinkRequest) -> Result<PaymentLink, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_statuses_deserialize_as_unknown() {
        let status: IntentStatus = serde_json::from_value(serde_json::json!("requires_capture")).unwrap();
        assert_eq!(status, IntentStatus::Unknown);
        let status: IntentStatus = serde_json::from_value(serde_json::json!("requires_action")).unwrap();
        assert_eq!(status, IntentStatus::RequiresAction);
    }
}
