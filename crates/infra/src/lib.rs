//! Lifecycle engine runtime: record stores, order locks, the audit trail,
//! payment gateway adapters, and the services that tie them to the domain
//! aggregates.

pub mod audit;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod lock;
pub mod pool;
pub mod retry;
pub mod services;
pub mod store;

#[cfg(test)]
mod integration_tests;

pub use config::EngineConfig;
pub use error::{LifecycleError, LifecycleResult};
pub use services::{Backends, Engine};
