//! Per-order advisory locks.
//!
//! A lock is a scoped acquisition: [`OrderLock::acquire`] returns a
//! [`LockGuard`] and the lock is released when the guard drops, on every exit
//! path including early returns and panics unwinding through the holder.
//!
//! Keys are stable per-order strings built by the helpers below, so every
//! caller that serializes the same order agrees on the key.

mod in_memory;
#[cfg(feature = "redis")]
mod redis_lock;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use inflow_core::{BulkPurchaseOrderId, InquiryId, PurchaseOrderId};

pub use in_memory::InMemoryOrderLock;
#[cfg(feature = "redis")]
pub use redis_lock::RedisOrderLock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("could not acquire lock {key} within {waited:?}")]
    Timeout { key: String, waited: Duration },

    #[error("lock backend failure: {0}")]
    Backend(String),
}

#[async_trait]
pub trait OrderLock: Send + Sync {
    /// Waits up to `timeout` for exclusive ownership of `key`.
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError>;
}

/// Exclusive ownership of one lock key. Dropping it releases the lock.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    key: String,
    acquired_at: Instant,
    // Whatever the backend needs dropped to give the key back.
    _release: Box<dyn Send + Sync>,
}

impl LockGuard {
    pub(crate) fn new(key: impl Into<String>, release: impl Send + Sync + 'static) -> Self {
        let key = key.into();
        debug!(lock_key = %key, "lock acquired");
        Self {
            key,
            acquired_at: Instant::now(),
            _release: Box::new(release),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl core::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        debug!(
            lock_key = %self.key,
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "lock released"
        );
    }
}

pub fn inquiry_key(id: InquiryId) -> String {
    format!("inquiry_{id}")
}

/// Guards preview, checkout and settlement of a sample order.
pub fn purchase_order_payment_key(id: PurchaseOrderId) -> String {
    format!("purchase_order_payment_{id}")
}

pub fn bulk_purchase_order_key(id: BulkPurchaseOrderId) -> String {
    format!("bulk_purchase_order_{id}")
}
