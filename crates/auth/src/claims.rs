use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use inflow_core::{Actor, ActorRole, UserId};

use crate::Role;

/// Claims the engine expects once a token has been verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the calling user.
    pub sub: UserId,

    pub roles: Vec<Role>,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

impl JwtClaims {
    /// Resolves the acting role, preferring admin over seller over buyer.
    pub fn actor(&self) -> Result<Actor, TokenValidationError> {
        let roles: Vec<ActorRole> = self.roles.iter().filter_map(Role::actor_role).collect();
        let role = [ActorRole::Admin, ActorRole::Seller, ActorRole::Buyer]
            .into_iter()
            .find(|r| roles.contains(r))
            .ok_or(TokenValidationError::NoKnownRole)?;
        Ok(Actor::new(self.sub, role))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("token carries no admin, seller or buyer role")]
    NoKnownRole,

    #[error("malformed token: {0}")]
    Malformed(String),
}

/// Validates the claim time window. Signature checks happen in [`crate::jwt`].
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}
