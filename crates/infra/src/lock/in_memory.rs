use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use super::{LockError, LockGuard, OrderLock};

/// Idle entries are pruned once the map grows past this many keys.
const PRUNE_THRESHOLD: usize = 1024;

/// Process-local keyed mutex.
///
/// One `tokio::sync::Mutex` per key, created on first use. Waiters queue
/// fairly on the mutex and give up after their timeout.
#[derive(Debug, Default)]
pub struct InMemoryOrderLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl InMemoryOrderLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops keys nobody holds or waits on.
    pub fn prune(&self) {
        // The map's own reference is the only one left for idle keys.
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[async_trait]
impl OrderLock for InMemoryOrderLock {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        if self.locks.len() > PRUNE_THRESHOLD {
            self.prune();
        }
        let mutex = self.locks.entry(key.to_string()).or_default().clone();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => Ok(LockGuard::new(key, guard)),
            Err(_) => {
                warn!(lock_key = %key, waited_ms = timeout.as_millis() as u64, "lock timeout");
                Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquirer_times_out_while_held() {
        let locks = InMemoryOrderLock::new();
        let held = locks.acquire("bulk_purchase_order_1", Duration::from_millis(50)).await.unwrap();

        match locks.acquire("bulk_purchase_order_1", Duration::from_millis(20)).await {
            Err(LockError::Timeout { key, .. }) => assert_eq!(key, "bulk_purchase_order_1"),
            other => panic!("Expected Timeout, got {other:?}"),
        }

        // Other keys are independent.
        assert!(locks.acquire("bulk_purchase_order_2", Duration::from_millis(20)).await.is_ok());
        drop(held);
    }

    #[tokio::test]
    async fn dropping_the_guard_releases_the_key() {
        let locks = InMemoryOrderLock::new();
        {
            let _guard = locks.acquire("inquiry_1", Duration::from_millis(50)).await.unwrap();
        }
        assert!(locks.acquire("inquiry_1", Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn released_after_an_error_return() {
        async fn failing(locks: &InMemoryOrderLock) -> Result<(), &'static str> {
            let _guard = locks
                .acquire("purchase_order_payment_1", Duration::from_millis(50))
                .await
                .map_err(|_| "lock")?;
            Err("gateway declined")
        }

        let locks = InMemoryOrderLock::new();
        assert_eq!(failing(&locks).await, Err("gateway declined"));
        assert!(locks
            .acquire("purchase_order_payment_1", Duration::from_millis(20))
            .await
            .is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn waiters_get_the_key_in_turn() {
        let locks = Arc::new(InMemoryOrderLock::new());
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let mut tasks = tokio::task::JoinSet::new();

        for _ in 0..8 {
            let locks = locks.clone();
            let counter = counter.clone();
            tasks.spawn(async move {
                let _guard = locks.acquire("inquiry_7", Duration::from_secs(5)).await.unwrap();
                let seen = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                // Nobody else entered while we held the key.
                assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), seen + 1);
            });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn prune_keeps_held_keys() {
        let locks = InMemoryOrderLock::new();
        let held = locks.acquire("a", Duration::from_millis(50)).await.unwrap();
        drop(locks.acquire("b", Duration::from_millis(50)).await.unwrap());
        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
