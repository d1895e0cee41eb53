//! Error surface of the lifecycle services.

use thiserror::Error;

use inflow_core::{DomainError, InvalidPricingInput};
use inflow_payments::GatewayError;

use crate::lock::LockError;
use crate::store::StoreError;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LifecycleError {
    /// Absent, soft-deleted, or hidden from the caller.
    #[error("not found")]
    NotFound,

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("already paid: {0}")]
    AlreadyPaid(String),

    #[error("order is busy, try again later ({0})")]
    LockTimeout(String),

    #[error("invalid pricing input: {0}")]
    Pricing(InvalidPricingInput),

    #[error("payment gateway error: {0}")]
    Gateway(GatewayError),

    /// Lost an optimistic write or hit a unique key.
    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("edit window has expired")]
    EditTimeoutExpired,

    #[error("store failure: {0}")]
    Store(StoreError),
}

impl LifecycleError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

impl From<DomainError> for LifecycleError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => Self::Validation(msg),
            DomainError::InvalidState(msg) => Self::InvalidState(msg),
            DomainError::NotFound => Self::NotFound,
            DomainError::Conflict(msg) => Self::PersistenceConflict(msg),
            DomainError::Unauthorized => Self::Unauthorized,
            DomainError::AlreadyPaid(msg) => Self::AlreadyPaid(msg),
            DomainError::EditTimeoutExpired => Self::EditTimeoutExpired,
            DomainError::Pricing(err) => Self::Pricing(err),
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => Self::NotFound,
            StoreError::Conflict(msg) => Self::PersistenceConflict(msg),
            other => Self::Store(other),
        }
    }
}

impl From<LockError> for LifecycleError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Timeout { key, .. } => Self::LockTimeout(key),
            LockError::Backend(msg) => Self::Store(StoreError::Backend(msg)),
        }
    }
}

impl From<GatewayError> for LifecycleError {
    fn from(value: GatewayError) -> Self {
        Self::Gateway(value)
    }
}
