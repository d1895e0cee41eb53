use std::sync::RwLock;

use async_trait::async_trait;

use inflow_core::{Attachment, AuditRecordId};

use super::{AuditRecord, AuditStore, AuditSubject};
use crate::store::StoreError;

#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if records.iter().any(|r| r.id == record.id) {
            return Err(StoreError::Conflict(format!("audit record {} already exists", record.id)));
        }
        records.push(record.clone());
        Ok(())
    }

    async fn annotate(
        &self,
        id: AuditRecordId,
        notes: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<AuditRecord, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound)?;
        record.notes = notes;
        record.attachments = attachments;
        Ok(record.clone())
    }

    async fn list(&self, subject: &AuditSubject) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.iter().filter(|r| r.subject == *subject).cloned().collect())
    }
}
