use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use inflow_core::ActorRole;

/// Role name as carried in a token.
///
/// Roles stay opaque strings at the token layer; [`Role::actor_role`] folds
/// them into the three roles the lifecycle engine knows about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));
    pub const BUYER: Role = Role(Cow::Borrowed("buyer"));
    pub const SELLER: Role = Role(Cow::Borrowed("seller"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Staff and leader accounts act as admins.
    pub fn actor_role(&self) -> Option<ActorRole> {
        match self.as_str().to_ascii_lowercase().as_str() {
            "admin" | "staff" | "leader" => Some(ActorRole::Admin),
            "seller" => Some(ActorRole::Seller),
            "buyer" => Some(ActorRole::Buyer),
            _ => None,
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staff_roles_fold_into_admin() {
        assert_eq!(Role::new("staff").actor_role(), Some(ActorRole::Admin));
        assert_eq!(Role::new("Leader").actor_role(), Some(ActorRole::Admin));
        assert_eq!(Role::SELLER.actor_role(), Some(ActorRole::Seller));
        assert_eq!(Role::new("auditor").actor_role(), None);
    }
}
