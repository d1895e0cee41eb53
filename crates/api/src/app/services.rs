//! Engine wiring: stores, lock and gateway picked from configuration.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use inflow_infra::gateway::{ScriptedGateway, StripeGateway};
use inflow_infra::lock::{InMemoryOrderLock, OrderLock};
use inflow_infra::store::run_migrations;
use inflow_infra::{Backends, Engine};
use inflow_payments::PaymentGateway;

use crate::config::AppConfig;

pub async fn build_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let gateway: Arc<dyn PaymentGateway> = match &config.stripe {
        Some(stripe) => Arc::new(StripeGateway::new(stripe.clone())),
        None => {
            warn!("STRIPE_SECRET_KEY not set; card payments use the scripted gateway");
            Arc::new(ScriptedGateway::new())
        }
    };

    let backends = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .connect(url)
                .await
                .context("failed to connect to postgres")?;
            run_migrations(&pool).await.context("failed to run migrations")?;
            info!("using postgres stores");
            Backends::postgres(pool, build_lock(config)?, gateway)
        }
        None => {
            info!("using in-memory stores");
            Backends::in_memory(gateway)
        }
    };

    Ok(Engine::new(config.engine.clone(), backends))
}

#[cfg(feature = "redis")]
fn build_lock(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderLock>> {
    if let Some(url) = &config.redis_url {
        let lock = inflow_infra::lock::RedisOrderLock::new(url).context("invalid REDIS_URL")?;
        info!("using redis order lock");
        return Ok(Arc::new(lock));
    }
    Ok(Arc::new(InMemoryOrderLock::new()))
}

#[cfg(not(feature = "redis"))]
fn build_lock(config: &AppConfig) -> anyhow::Result<Arc<dyn OrderLock>> {
    if config.redis_url.is_some() {
        warn!("REDIS_URL set but the redis feature is off; locks are process-local");
    }
    Ok(Arc::new(InMemoryOrderLock::new()))
}
