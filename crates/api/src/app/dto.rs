//! Request bodies for endpoints whose service takes plain arguments.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use inflow_bulk::{BulkTrackingStatus, SellerRef, SellerTrackingStatus};
use inflow_core::{Attachment, BulkPurchaseOrderId, ChecklistItemId, UserId};
use inflow_infra::services::{ImportRow, LineInput};
use inflow_pricing::PaymentType;
use inflow_purchasing::PoTrackingTrigger;

#[derive(Debug, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectQuotationRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentsRequest {
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct EditTimeoutRequest {
    pub edit_timeout: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AssigneesRequest {
    pub assignee_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct CartItemsRequest {
    pub items: Vec<LineInput>,
}

/// Optional replacement lines; absent keeps the current ones.
#[derive(Debug, Default, Deserialize)]
pub struct OptionalItemsRequest {
    #[serde(default)]
    pub items: Option<Vec<LineInput>>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewQuery {
    #[serde(default)]
    pub payment_type: PaymentType,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkAsPaidRequest {
    #[serde(default)]
    pub recorded_amount: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MarkAsUnpaidRequest {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SampleTrackingRequest {
    pub trigger: PoTrackingTrigger,
}

#[derive(Debug, Deserialize)]
pub struct BulkTrackingRequest {
    pub target: BulkTrackingStatus,
}

#[derive(Debug, Deserialize)]
pub struct SellerTrackingRequest {
    pub target: SellerTrackingStatus,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRawMaterialRequest {
    pub item_ids: Vec<ChecklistItemId>,
}

#[derive(Debug, Deserialize)]
pub struct DeliveringRequest {
    #[serde(default)]
    pub logistic_info: Value,
}

#[derive(Debug, Deserialize)]
pub struct AssignSellerRequest {
    pub seller: SellerRef,
}

#[derive(Debug, Deserialize)]
pub struct SellerQuotationRequest {
    pub price: Decimal,
    pub lead_time_days: u32,
}

#[derive(Debug, Deserialize)]
pub struct SellerResponseRequest {
    pub accept: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    pub rows: Vec<ImportRow>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewManyRequest {
    pub ids: Vec<BulkPurchaseOrderId>,
}

#[derive(Debug, Deserialize)]
pub struct AnnotateAuditRequest {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}
