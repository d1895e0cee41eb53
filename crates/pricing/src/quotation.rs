use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use inflow_core::ValueObject;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotationKind {
    Sample,
    Bulk,
}

impl QuotationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QuotationKind::Sample => "sample",
            QuotationKind::Bulk => "bulk",
        }
    }
}

/// An admin price quote attached to an inquiry or bulk order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotation {
    #[serde(rename = "type")]
    pub kind: QuotationKind,
    pub price: Decimal,
    /// Production lead time in days.
    #[serde(default)]
    pub lead_time_days: u32,
    #[serde(default)]
    pub accepted: bool,
}

impl ValueObject for Quotation {}

impl Quotation {
    pub fn find(quotations: &[Quotation], kind: QuotationKind) -> Option<&Quotation> {
        quotations.iter().find(|q| q.kind == kind)
    }
}
