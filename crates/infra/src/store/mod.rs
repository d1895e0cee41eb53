//! Record persistence for the lifecycle aggregates.
//!
//! Aggregates are stored as whole snapshots with a version column. Writes are
//! optimistic single-row updates: [`RecordStore::save`] compares the stored
//! version against an [`ExpectedVersion`] and fails with
//! [`StoreError::Conflict`] when another writer got there first.
//!
//! Natural keys (reference ids, the one-sample-per-inquiry and
//! one-bulk-per-sample links) are declared by each record type and enforced
//! on insert.

mod in_memory;
mod postgres;
mod transactions;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use inflow_bulk::BulkPurchaseOrder;
use inflow_core::{AggregateRoot, ExpectedVersion};
use inflow_inquiry::Inquiry;
use inflow_payments::PaymentTransaction;
use inflow_purchasing::PurchaseOrder;

pub use in_memory::InMemoryRecordStore;
pub use postgres::{PostgresRecordStore, run_migrations};
pub(crate) use postgres::map_sqlx_error;
pub use transactions::TransactionLedger;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    /// Stale version or unique-key collision.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,

    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("serialization failure: {0}")]
    Serialization(String),
}

/// A natural key that must be unique across all records of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey {
    pub name: &'static str,
    pub value: String,
}

impl UniqueKey {
    pub fn new(name: &'static str, value: impl ToString) -> Self {
        Self {
            name,
            value: value.to_string(),
        }
    }
}

/// A persistable aggregate snapshot.
pub trait Record:
    AggregateRoot<Id: Send + Sync> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Stable discriminator, used as the table partition in Postgres.
    const KIND: &'static str;

    fn key(id: &Self::Id) -> String;

    fn unique_keys(&self) -> Vec<UniqueKey>;

    fn record_key(&self) -> String {
        Self::key(self.id())
    }
}

#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    async fn load(&self, id: &R::Id) -> Result<Option<R>, StoreError>;

    /// Fails with `Conflict` when the id or any unique key is taken.
    async fn insert(&self, record: &R) -> Result<(), StoreError>;

    /// Replaces the stored snapshot when its version matches `expected`.
    async fn save(&self, record: &R, expected: ExpectedVersion) -> Result<(), StoreError>;

    async fn delete(&self, id: &R::Id) -> Result<(), StoreError>;

    /// Resolves a record through one of its unique keys.
    async fn find_by_key(&self, name: &'static str, value: &str) -> Result<Option<R>, StoreError>;

    /// All records of this kind, oldest insert first.
    async fn list(&self) -> Result<Vec<R>, StoreError>;
}

impl Record for Inquiry {
    const KIND: &'static str = "inquiry";

    fn key(id: &Self::Id) -> String {
        id.to_string()
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        vec![UniqueKey::new("reference_id", self.reference_id())]
    }
}

impl Record for PurchaseOrder {
    const KIND: &'static str = "purchase_order";

    fn key(id: &Self::Id) -> String {
        id.to_string()
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        let mut keys = vec![UniqueKey::new("reference_id", self.reference_id())];
        if let Some(inquiry_id) = self.inquiry_id() {
            keys.push(UniqueKey::new("inquiry_id", inquiry_id));
        }
        keys
    }
}

impl Record for BulkPurchaseOrder {
    const KIND: &'static str = "bulk_purchase_order";

    fn key(id: &Self::Id) -> String {
        id.to_string()
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        let mut keys = vec![UniqueKey::new("reference_id", self.reference_id())];
        if let Some(purchase_order_id) = self.purchase_order_id() {
            keys.push(UniqueKey::new("purchase_order_id", purchase_order_id));
        }
        keys
    }
}

impl Record for PaymentTransaction {
    const KIND: &'static str = "payment_transaction";

    fn key(id: &Self::Id) -> String {
        id.to_string()
    }

    fn unique_keys(&self) -> Vec<UniqueKey> {
        vec![UniqueKey::new("reference_id", &self.reference_id)]
    }
}
