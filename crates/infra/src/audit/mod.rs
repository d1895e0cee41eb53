//! Append-only audit trail.
//!
//! Aggregates describe their changes as [`AuditEntry`] values; the trail
//! stamps them with subject, actor and time and appends them. Records are
//! never updated except for operator notes and attachments via
//! [`AuditTrail::annotate`].
//!
//! The trail is advisory. [`AuditTrail::append`] retries transient failures
//! and then gives up loudly; callers log and carry on rather than undoing the
//! state change the record describes.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{error, warn};

use inflow_core::{
    Attachment, AuditAction, AuditEntry, AuditRecordId, BulkPurchaseOrderId, InquiryId,
    PurchaseOrderId, UserId,
};

use crate::retry::RetryPolicy;
use crate::store::StoreError;

pub use in_memory::InMemoryAuditStore;
pub use postgres::PostgresAuditStore;

/// The order an audit record is about.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AuditSubject {
    Inquiry(InquiryId),
    PurchaseOrder(PurchaseOrderId),
    BulkPurchaseOrder(BulkPurchaseOrderId),
}

impl AuditSubject {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditSubject::Inquiry(_) => "inquiry",
            AuditSubject::PurchaseOrder(_) => "purchase_order",
            AuditSubject::BulkPurchaseOrder(_) => "bulk_purchase_order",
        }
    }

    pub fn id_string(&self) -> String {
        match self {
            AuditSubject::Inquiry(id) => id.to_string(),
            AuditSubject::PurchaseOrder(id) => id.to_string(),
            AuditSubject::BulkPurchaseOrder(id) => id.to_string(),
        }
    }

    pub(crate) fn parse(kind: &str, id: &str) -> Result<Self, StoreError> {
        let bad_id = |e: inflow_core::DomainError| StoreError::Serialization(e.to_string());
        match kind {
            "inquiry" => Ok(AuditSubject::Inquiry(id.parse().map_err(bad_id)?)),
            "purchase_order" => Ok(AuditSubject::PurchaseOrder(id.parse().map_err(bad_id)?)),
            "bulk_purchase_order" => {
                Ok(AuditSubject::BulkPurchaseOrder(id.parse().map_err(bad_id)?))
            }
            other => Err(StoreError::Serialization(format!(
                "unknown audit subject kind {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: AuditRecordId,
    pub subject: AuditSubject,
    /// Parent inquiry of the order family, for cross-order history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inquiry_id: Option<InquiryId>,
    pub action: AuditAction,
    /// `None` for gateway callbacks and other system actions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<UserId>,
    #[serde(default)]
    pub before: Map<String, Value>,
    #[serde(default)]
    pub after: Map<String, Value>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_entry(
        subject: AuditSubject,
        inquiry_id: Option<InquiryId>,
        actor_id: Option<UserId>,
        entry: AuditEntry,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AuditRecordId::new(),
            subject,
            inquiry_id,
            action: entry.action,
            actor_id,
            before: entry.before,
            after: entry.after,
            description: entry.description,
            notes: None,
            attachments: Vec::new(),
            created_at,
        }
    }
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Replaces the operator notes and attachments of one record.
    async fn annotate(
        &self,
        id: AuditRecordId,
        notes: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<AuditRecord, StoreError>;

    /// Records of one subject, oldest first.
    async fn list(&self, subject: &AuditSubject) -> Result<Vec<AuditRecord>, StoreError>;
}

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    retry: RetryPolicy,
}

impl core::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AuditTrail").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.append(record).await {
                Ok(()) => return Ok(()),
                Err(err) if is_transient(&err) && self.retry.should_retry(attempt) => {
                    warn!(
                        audit_id = %record.id,
                        action = %record.action.as_str(),
                        attempt,
                        error = %err,
                        "audit append failed, retrying"
                    );
                    tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        audit_id = %record.id,
                        subject = %record.subject.id_string(),
                        action = %record.action.as_str(),
                        attempts = attempt,
                        error = %err,
                        "audit append failed"
                    );
                    return Err(err);
                }
            }
        }
    }

    pub async fn annotate(
        &self,
        id: AuditRecordId,
        notes: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<AuditRecord, StoreError> {
        self.store.annotate(id, notes, attachments).await
    }

    pub async fn list(&self, subject: &AuditSubject) -> Result<Vec<AuditRecord>, StoreError> {
        self.store.list(subject).await
    }
}

fn is_transient(err: &StoreError) -> bool {
    matches!(err, StoreError::Backend(_) | StoreError::Poisoned)
}
