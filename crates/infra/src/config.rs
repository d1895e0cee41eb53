//! Engine configuration loaded from the environment.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Budget for acquiring an order lock around a pricing preview.
    pub preview_lock_timeout: Duration,
    /// Budget for acquiring an order lock around checkout and settlement.
    /// Must exceed the slowest expected gateway round-trip.
    pub payment_lock_timeout: Duration,
    /// Public base URL used to build gateway return and redirect URLs.
    pub server_base_url: String,
    pub import_concurrency: usize,
    pub audit_max_attempts: u32,
    pub audit_retry_base: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preview_lock_timeout: Duration::from_secs(30),
            payment_lock_timeout: Duration::from_secs(20),
            server_base_url: "http://localhost:8080".to_string(),
            import_concurrency: 10,
            audit_max_attempts: 3,
            audit_retry_base: Duration::from_millis(50),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            preview_lock_timeout: Duration::from_secs(env_or(
                "PREVIEW_LOCK_TIMEOUT_SECS",
                defaults.preview_lock_timeout.as_secs(),
            )),
            payment_lock_timeout: Duration::from_secs(env_or(
                "PAYMENT_LOCK_TIMEOUT_SECS",
                defaults.payment_lock_timeout.as_secs(),
            )),
            server_base_url: std::env::var("SERVER_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.server_base_url),
            import_concurrency: env_or("IMPORT_CONCURRENCY", defaults.import_concurrency).max(1),
            audit_max_attempts: env_or("AUDIT_MAX_ATTEMPTS", defaults.audit_max_attempts).max(1),
            audit_retry_base: Duration::from_millis(env_or(
                "AUDIT_RETRY_BASE_MS",
                defaults.audit_retry_base.as_millis() as u64,
            )),
        }
    }

    /// Return URL handed to the gateway for a sample order card payment.
    pub fn purchase_order_return_url(&self, order_id: impl core::fmt::Display) -> String {
        format!(
            "{}/api/v1/callback/payment-intents/purchase-orders/{order_id}/confirm",
            self.server_base_url
        )
    }

    pub fn bulk_order_return_url(
        &self,
        order_id: impl core::fmt::Display,
        milestone: impl core::fmt::Display,
    ) -> String {
        format!(
            "{}/api/v1/callback/payment-intents/bulk-purchase-orders/{order_id}/{milestone}/confirm",
            self.server_base_url
        )
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable configuration value");
                default
            }
        },
        Err(_) => default,
    }
}
