//! Audit vocabulary shared by the aggregates and the audit trail.
//!
//! Aggregates describe their own state changes as [`AuditEntry`] values (via
//! [`Auditable`] on their event types); the infrastructure layer stamps them
//! with a subject, actor and timestamp and appends them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Closed set of audited actions. Serialized names are stable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    InquiryCreated,
    InquiryEdited,
    InquiryAdminSendBuyerQuotation,
    InquiryBuyerApproveQuotation,
    InquiryBuyerRejectQuotation,
    InquiryClosed,
    InquiryCanceled,
    InquiryFinished,
    InquiryAssignPic,
    InquiryEditTimeoutUpdated,

    InquirySamplePoCreated,
    InquirySamplePoPricingUpdated,
    InquirySamplePoCartItemsUpdated,
    InquirySamplePoPaymentSubmitted,
    InquirySamplePoPaymentRequiresAction,
    InquirySamplePoCardPaid,
    InquiryAdminMarkAsPaid,
    InquiryAdminMarkAsUnPaid,
    InquirySamplePoTrackingStatus,
    InquirySamplePoAssignPic,
    InquirySamplePoPaymentLinkCreated,

    InquiryBulkPoCreated,
    BulkPoSubmissionRequested,
    BulkPoSubmitted,
    BulkPoAdminSendQuotation,
    BulkPoPricingUpdated,
    BulkPoPaymentSubmitted,
    BulkPoPaymentRequiresAction,
    BulkPoCardPaid,
    BulkPoMarkAsPaid,
    BulkPoMarkAsUnpaid,
    BulkPoSecondPaymentRequested,
    BulkPoRawMaterialUpdated,
    BulkPoBuyerApproveRawMaterial,
    BulkPoPpsUpdated,
    BulkPoProductionUpdated,
    BulkPoQcReportCreated,
    BulkPoGoodsSubmitted,
    BulkPoFinalPaymentRequested,
    BulkPoDelivering,
    BulkPoDelivered,
    BulkPoDeliveryConfirmed,
    BulkPoDepositCreated,
    BulkPoPaymentLinkCreated,
    BulkPoAssignPic,
    BulkPoSellerAssigned,
    BulkPoSellerQuotationSubmitted,
    BulkPoSellerResponded,
    BulkPoSellerTrackingStatus,
    BulkPoTrackingStatus,
    BulkPoReset,
}

impl AuditAction {
    pub fn as_str(self) -> String {
        match serde_json::to_value(self) {
            Ok(Value::String(s)) => s,
            _ => format!("{self:?}"),
        }
    }
}

/// One audited change: what happened plus before/after metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub description: String,
    #[serde(default)]
    pub before: Map<String, Value>,
    #[serde(default)]
    pub after: Map<String, Value>,
}

impl AuditEntry {
    pub fn new(action: AuditAction, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
            before: Map::new(),
            after: Map::new(),
        }
    }

    /// Records `key` in both snapshots.
    pub fn change<B: Serialize, A: Serialize>(mut self, key: &str, before: B, after: A) -> Self {
        self.before.insert(key.to_string(), to_value(before));
        self.after.insert(key.to_string(), to_value(after));
        self
    }

    /// Records `key` in the after snapshot only.
    pub fn with<A: Serialize>(mut self, key: &str, after: A) -> Self {
        self.after.insert(key.to_string(), to_value(after));
        self
    }
}

fn to_value<T: Serialize>(v: T) -> Value {
    serde_json::to_value(v).unwrap_or(Value::Null)
}

/// Implemented by event enums whose variants are worth an audit record.
pub trait Auditable {
    /// `None` for events that are bookkeeping only.
    fn audit_entry(&self) -> Option<AuditEntry>;
}
