//! Postgres-backed record store.
//!
//! Snapshots live in `records` as JSONB next to a version column; natural
//! keys live in `record_unique_keys` under a primary key, so a duplicate
//! insert fails at the database.
//!
//! ## Error Mapping
//!
//! | SQLx error | PostgreSQL code | StoreError |
//! |------------|-----------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | any | `Backend` |
//! | PoolClosed / other | n/a | `Backend` |

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use inflow_core::ExpectedVersion;

use super::{Record, RecordStore, StoreError, UniqueKey};

const MIGRATION: &str = include_str!("../../migrations/0001_lifecycle.sql");

/// Creates the record, unique-key and audit tables when missing.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATION)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("run_migrations", e))?;
    Ok(())
}

#[derive(Debug)]
pub struct PostgresRecordStore<R> {
    pool: Arc<PgPool>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for PostgresRecordStore<R> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> PostgresRecordStore<R> {
    pub fn new(pool: PgPool) -> Self {
        Self::from_shared(Arc::new(pool))
    }

    pub fn from_shared(pool: Arc<PgPool>) -> Self {
        Self {
            pool,
            _record: PhantomData,
        }
    }

    fn encode(record: &R) -> Result<serde_json::Value, StoreError> {
        serde_json::to_value(record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(body: serde_json::Value) -> Result<R, StoreError> {
        serde_json::from_value(body).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn insert_unique_keys(
        tx: &mut Transaction<'_, Postgres>,
        record_id: &str,
        keys: &[UniqueKey],
    ) -> Result<(), StoreError> {
        for key in keys {
            sqlx::query(
                r#"
                INSERT INTO record_unique_keys (kind, name, value, record_id)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(R::KIND)
            .bind(key.name)
            .bind(&key.value)
            .bind(record_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_unique_key", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for PostgresRecordStore<R> {
    #[instrument(skip(self, id), fields(kind = R::KIND, id = %R::key(id)), err)]
    async fn load(&self, id: &R::Id) -> Result<Option<R>, StoreError> {
        let row = sqlx::query("SELECT body FROM records WHERE kind = $1 AND id = $2")
            .bind(R::KIND)
            .bind(R::key(id))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load", e))?;

        row.map(|row| {
            let body: serde_json::Value = row
                .try_get("body")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Self::decode(body)
        })
        .transpose()
    }

    #[instrument(skip(self, record), fields(kind = R::KIND, id = %record.record_key()), err)]
    async fn insert(&self, record: &R) -> Result<(), StoreError> {
        let id = record.record_key();
        let body = Self::encode(record)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        sqlx::query(
            r#"
            INSERT INTO records (kind, id, version, body)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(R::KIND)
        .bind(&id)
        .bind(record.version() as i64)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        Self::insert_unique_keys(&mut tx, &id, &record.unique_keys()).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, record),
        fields(kind = R::KIND, id = %record.record_key(), expected = ?expected),
        err
    )]
    async fn save(&self, record: &R, expected: ExpectedVersion) -> Result<(), StoreError> {
        let id = record.record_key();
        let body = Self::encode(record)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;

        let updated = match expected {
            ExpectedVersion::Any => sqlx::query(
                r#"
                UPDATE records SET version = $3, body = $4, updated_at = now()
                WHERE kind = $1 AND id = $2
                "#,
            )
            .bind(R::KIND)
            .bind(&id)
            .bind(record.version() as i64)
            .bind(&body)
            .execute(&mut *tx)
            .await,
            ExpectedVersion::Exact(version) => sqlx::query(
                r#"
                UPDATE records SET version = $3, body = $4, updated_at = now()
                WHERE kind = $1 AND id = $2 AND version = $5
                "#,
            )
            .bind(R::KIND)
            .bind(&id)
            .bind(record.version() as i64)
            .bind(&body)
            .bind(version as i64)
            .execute(&mut *tx)
            .await,
        }
        .map_err(|e| map_sqlx_error("save", e))?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM records WHERE kind = $1 AND id = $2")
                .bind(R::KIND)
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("save", e))?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(format!("{} {id}: expected {expected:?}", R::KIND))
            } else {
                StoreError::NotFound
            });
        }

        sqlx::query("DELETE FROM record_unique_keys WHERE kind = $1 AND record_id = $2")
            .bind(R::KIND)
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("save", e))?;
        Self::insert_unique_keys(&mut tx, &id, &record.unique_keys()).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    #[instrument(skip(self, id), fields(kind = R::KIND, id = %R::key(id)), err)]
    async fn delete(&self, id: &R::Id) -> Result<(), StoreError> {
        let deleted = sqlx::query("DELETE FROM records WHERE kind = $1 AND id = $2")
            .bind(R::KIND)
            .bind(R::key(id))
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(kind = R::KIND), err)]
    async fn find_by_key(&self, name: &'static str, value: &str) -> Result<Option<R>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT r.body FROM record_unique_keys k
            JOIN records r ON r.kind = k.kind AND r.id = k.record_id
            WHERE k.kind = $1 AND k.name = $2 AND k.value = $3
            "#,
        )
        .bind(R::KIND)
        .bind(name)
        .bind(value)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_key", e))?;

        row.map(|row| {
            let body: serde_json::Value = row
                .try_get("body")
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            Self::decode(body)
        })
        .transpose()
    }

    #[instrument(skip(self), fields(kind = R::KIND), err)]
    async fn list(&self) -> Result<Vec<R>, StoreError> {
        let rows = sqlx::query("SELECT body FROM records WHERE kind = $1 ORDER BY created_at, id")
            .bind(R::KIND)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        rows.into_iter()
            .map(|row| {
                let body: serde_json::Value = row
                    .try_get("body")
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Self::decode(body)
            })
            .collect()
    }
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => StoreError::NotFound,
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}
