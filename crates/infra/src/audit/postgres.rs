use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use inflow_core::{Attachment, AuditAction, AuditRecordId, InquiryId, UserId};

use super::{AuditRecord, AuditStore, AuditSubject};
use crate::store::StoreError;
use crate::store::map_sqlx_error;

const COLUMNS: &str = "id, subject_kind, subject_id, inquiry_id, action, actor_id, before, after, \
                       description, notes, attachments, created_at";

#[derive(Debug, Clone)]
pub struct PostgresAuditStore {
    pool: Arc<PgPool>,
}

impl PostgresAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self::from_shared(Arc::new(pool))
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

fn serialization<E: core::fmt::Display>(e: E) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn decode(row: &PgRow) -> Result<AuditRecord, StoreError> {
    let kind: String = row.try_get("subject_kind").map_err(serialization)?;
    let subject_id: String = row.try_get("subject_id").map_err(serialization)?;
    let action: String = row.try_get("action").map_err(serialization)?;
    let attachments: Value = row.try_get("attachments").map_err(serialization)?;

    Ok(AuditRecord {
        id: AuditRecordId::from_uuid(row.try_get::<Uuid, _>("id").map_err(serialization)?),
        subject: AuditSubject::parse(&kind, &subject_id)?,
        inquiry_id: row
            .try_get::<Option<Uuid>, _>("inquiry_id")
            .map_err(serialization)?
            .map(InquiryId::from_uuid),
        action: serde_json::from_value::<AuditAction>(Value::String(action)).map_err(serialization)?,
        actor_id: row
            .try_get::<Option<Uuid>, _>("actor_id")
            .map_err(serialization)?
            .map(UserId::from_uuid),
        before: object(row.try_get("before").map_err(serialization)?),
        after: object(row.try_get("after").map_err(serialization)?),
        description: row.try_get("description").map_err(serialization)?,
        notes: row.try_get("notes").map_err(serialization)?,
        attachments: serde_json::from_value(attachments).map_err(serialization)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(serialization)?,
    })
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    #[instrument(skip(self, record), fields(audit_id = %record.id, action = %record.action.as_str()), err)]
    async fn append(&self, record: &AuditRecord) -> Result<(), StoreError> {
        let attachments = serde_json::to_value(&record.attachments).map_err(serialization)?;
        sqlx::query(
            r#"
            INSERT INTO audit_records
                (id, subject_kind, subject_id, inquiry_id, action, actor_id, before, after,
                 description, notes, attachments, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(record.id.as_uuid())
        .bind(record.subject.kind())
        .bind(record.subject.id_string())
        .bind(record.inquiry_id.map(Uuid::from))
        .bind(record.action.as_str())
        .bind(record.actor_id.map(Uuid::from))
        .bind(Value::Object(record.before.clone()))
        .bind(Value::Object(record.after.clone()))
        .bind(&record.description)
        .bind(&record.notes)
        .bind(attachments)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit", e))?;
        Ok(())
    }

    #[instrument(skip(self, notes, attachments), fields(audit_id = %id), err)]
    async fn annotate(
        &self,
        id: AuditRecordId,
        notes: Option<String>,
        attachments: Vec<Attachment>,
    ) -> Result<AuditRecord, StoreError> {
        let attachments = serde_json::to_value(&attachments).map_err(serialization)?;
        let row = sqlx::query(&format!(
            "UPDATE audit_records SET notes = $2, attachments = $3 WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(notes)
        .bind(attachments)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("annotate_audit", e))?
        .ok_or(StoreError::NotFound)?;
        decode(&row)
    }

    #[instrument(skip(self), fields(subject = %subject.id_string()), err)]
    async fn list(&self, subject: &AuditSubject) -> Result<Vec<AuditRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM audit_records WHERE subject_kind = $1 AND subject_id = $2 ORDER BY seq"
        ))
        .bind(subject.kind())
        .bind(subject.id_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit", e))?;
        rows.iter().map(decode).collect()
    }
}
