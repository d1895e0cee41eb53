use std::sync::Arc;

use inflow_core::{ExpectedVersion, PaymentTransactionId};
use inflow_payments::{OrderRef, PaymentTransaction};
use inflow_pricing::{Milestone, PaymentType};

use super::{RecordStore, StoreError};

/// Payment transaction queries on top of a record store.
#[derive(Clone)]
pub struct TransactionLedger {
    store: Arc<dyn RecordStore<PaymentTransaction>>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn RecordStore<PaymentTransaction>>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, transaction: &PaymentTransaction) -> Result<(), StoreError> {
        self.store.insert(transaction).await
    }

    /// Persists a transaction mutated from the `loaded_version` snapshot.
    pub async fn save(
        &self,
        transaction: &PaymentTransaction,
        loaded_version: u64,
    ) -> Result<(), StoreError> {
        self.store
            .save(transaction, ExpectedVersion::Exact(loaded_version))
            .await
    }

    pub async fn load(
        &self,
        id: &PaymentTransactionId,
    ) -> Result<Option<PaymentTransaction>, StoreError> {
        self.store.load(id).await
    }

    /// Every transaction of one order, oldest first.
    pub async fn list_for_order(
        &self,
        order: &OrderRef,
    ) -> Result<Vec<PaymentTransaction>, StoreError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|tx| tx.order == *order)
            .collect())
    }

    /// Latest transaction still waiting for an admin ruling.
    pub async fn find_pending(
        &self,
        order: &OrderRef,
        milestone: Milestone,
        payment_type: PaymentType,
    ) -> Result<Option<PaymentTransaction>, StoreError> {
        Ok(self
            .list_for_order(order)
            .await?
            .into_iter()
            .filter(|tx| {
                tx.milestone == milestone && tx.payment_type == payment_type && tx.is_pending()
            })
            .max_by_key(|tx| (tx.created_at, tx.version)))
    }
}

impl core::fmt::Debug for TransactionLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TransactionLedger").finish_non_exhaustive()
    }
}
