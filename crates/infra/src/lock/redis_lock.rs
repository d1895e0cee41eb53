//! Cluster-wide lock on Redis (`SET NX PX` plus compare-and-delete release).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, warn};
use uuid::Uuid;

use super::{LockError, LockGuard, OrderLock};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

#[derive(Debug, Clone)]
pub struct RedisOrderLock {
    client: Arc<redis::Client>,
    /// Upper bound on how long a crashed holder can wedge a key.
    lease: Duration,
    poll_interval: Duration,
}

impl RedisOrderLock {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, LockError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| LockError::Backend(format!("failed to create redis client: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            lease: Duration::from_secs(60),
            poll_interval: Duration::from_millis(50),
        })
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    async fn try_set(&self, key: &str, token: &str) -> Result<bool, LockError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LockError::Backend(format!("redis connection failed: {e}")))?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis SET NX failed: {e}")))?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl OrderLock for RedisOrderLock {
    async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let token = Uuid::now_v7().to_string();
        let started = Instant::now();

        loop {
            if self.try_set(key, &token).await? {
                let release = RedisRelease {
                    client: self.client.clone(),
                    key: key.to_string(),
                    token,
                };
                return Ok(LockGuard::new(key, release));
            }
            if started.elapsed() >= timeout {
                warn!(lock_key = %key, waited_ms = timeout.as_millis() as u64, "lock timeout");
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Deletes the key on drop, but only while it still carries our token.
struct RedisRelease {
    client: Arc<redis::Client>,
    key: String,
    token: String,
}

impl Drop for RedisRelease {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(lock_key = %self.key, "no runtime to release lock; it expires with its lease");
            return;
        };
        let client = self.client.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);

        handle.spawn(async move {
            let result = async {
                let mut conn = client.get_multiplexed_async_connection().await?;
                redis::Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async::<_, i64>(&mut conn)
                    .await
            }
            .await;
            if let Err(e) = result {
                error!(lock_key = %key, error = %e, "failed to release redis lock");
            }
        });
    }
}
