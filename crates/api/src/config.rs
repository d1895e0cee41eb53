//! Process configuration for the API binary.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::warn;

use inflow_infra::EngineConfig;
use inflow_infra::gateway::StripeConfig;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    /// Postgres stores when set, in-memory otherwise.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Redis order lock when set and the `redis` feature is on.
    pub redis_url: Option<String>,
    /// Stripe when set, the scripted in-process gateway otherwise.
    pub stripe: Option<StripeConfig>,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .context("BIND_ADDR must be host:port")?;

        let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let db_max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
            Ok(raw) => raw.parse().context("DB_MAX_CONNECTIONS must be a number")?,
            Err(_) => 10,
        };

        Ok(Self {
            bind_addr,
            jwt_secret,
            database_url: non_empty_env("DATABASE_URL"),
            db_max_connections,
            redis_url: non_empty_env("REDIS_URL"),
            stripe: StripeConfig::from_env(),
            engine: EngineConfig::from_env(),
        })
    }

    /// In-memory everything with the scripted gateway. Tests and local runs.
    pub fn local(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.into(),
            database_url: None,
            db_max_connections: 1,
            redis_url: None,
            stripe: None,
            engine: EngineConfig::default(),
        }
    }
}

impl core::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"<redacted>")
            .field("database", &self.database_url.as_ref().map(|_| "<set>"))
            .field("redis", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("stripe", &self.stripe.is_some())
            .field("engine", &self.engine)
            .finish()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
