//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Malformed pricing input (bad quantities, percentages or missing quotations).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidPricingInput {
    #[error("quantity must be positive (line {line})")]
    NonPositiveQuantity { line: usize },

    #[error("no line items to price")]
    EmptyCart,

    #[error("missing {0} quotation")]
    MissingQuotation(&'static str),

    #[error("invalid milestone percentages: {0}")]
    Percentage(String),

    #[error("negative amount: {0}")]
    NegativeAmount(&'static str),

    #[error("amount cannot be represented in the smallest currency unit")]
    Overflow,

    /// Deposit and sample credits larger than what the final milestone carries.
    #[error("credits of {credits} exceed the final payment of {remaining}")]
    CreditsExceedFinal { credits: Decimal, remaining: Decimal },
}

/// Domain-level error.
///
/// Deterministic business failures only. Lock, store and gateway failures are
/// modelled by the infrastructure crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation attempted outside its required source state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Absent, soft-deleted, or filtered out by ownership.
    #[error("not found")]
    NotFound,

    /// Stale version or unique-key collision.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Settlement guard tripped: the payment was already taken.
    #[error("already paid: {0}")]
    AlreadyPaid(String),

    #[error("edit window has expired")]
    EditTimeoutExpired,

    #[error("pricing error: {0}")]
    Pricing(#[from] InvalidPricingInput),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn already_paid(msg: impl Into<String>) -> Self {
        Self::AlreadyPaid(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
