//! Order line items.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use inflow_core::{Attachment, CartItemId, ValueObject};

/// One priced line of a sample or bulk order.
///
/// Owned by exactly one order and replaced wholesale on every pricing update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub id: CartItemId,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub color: String,
    pub qty: i64,
    /// Zero means "use the quoted price".
    #[serde(default)]
    pub unit_price: Decimal,
    #[serde(default)]
    pub total_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CartItem {
    pub fn new(size: impl Into<String>, color: impl Into<String>, qty: i64, unit_price: Decimal) -> Self {
        Self {
            id: CartItemId::new(),
            size: size.into(),
            color: color.into(),
            qty,
            unit_price,
            total_price: Decimal::ZERO,
            note: None,
        }
    }
}

/// Extra charge added by an admin at final payment (packaging, labels, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalItem {
    pub description: String,
    pub qty: i64,
    pub unit_price: Decimal,
    #[serde(default)]
    pub total_price: Decimal,
}

impl ValueObject for AdditionalItem {}

/// The seller's commercial invoice; when present it overrides the quoted terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommercialInvoice {
    pub sub_total: Decimal,
    pub tax_percentage: Decimal,
    pub shipping_fee: Decimal,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl ValueObject for CommercialInvoice {}
