use serde::{Deserialize, Serialize};

use crate::id::UserId;

/// Coarse role that gates which transitions a caller may trigger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Admin,
    Seller,
    Buyer,
}

/// Opaque caller identity passed into every lifecycle operation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: ActorRole,
}

impl Actor {
    pub fn new(id: UserId, role: ActorRole) -> Self {
        Self { id, role }
    }

    pub fn admin(id: UserId) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    pub fn buyer(id: UserId) -> Self {
        Self::new(id, ActorRole::Buyer)
    }

    pub fn seller(id: UserId) -> Self {
        Self::new(id, ActorRole::Seller)
    }

    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }

    pub fn is_buyer(&self) -> bool {
        self.role == ActorRole::Buyer
    }

    pub fn is_seller(&self) -> bool {
        self.role == ActorRole::Seller
    }
}
