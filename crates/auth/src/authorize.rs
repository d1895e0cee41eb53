use thiserror::Error;

use inflow_core::{Actor, ActorRole};

/// Who may call an operation. Ownership checks happen in the lifecycle
/// services, which answer `NotFound` for rows the caller cannot see.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Gate {
    Admin,
    Buyer,
    Seller,
    AdminOrBuyer,
    AdminOrSeller,
    Authenticated,
}

impl Gate {
    fn allows(self, role: ActorRole) -> bool {
        use ActorRole::*;
        match self {
            Gate::Admin => role == Admin,
            Gate::Buyer => role == Buyer,
            Gate::Seller => role == Seller,
            Gate::AdminOrBuyer => matches!(role, Admin | Buyer),
            Gate::AdminOrSeller => matches!(role, Admin | Seller),
            Gate::Authenticated => true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: {role:?} cannot pass the {gate:?} gate")]
    Forbidden { role: ActorRole, gate: Gate },
}

/// Pure role check: no IO, no panics.
pub fn authorize(actor: &Actor, gate: Gate) -> Result<(), AuthzError> {
    if gate.allows(actor.role) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden {
            role: actor.role,
            gate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::UserId;

    #[test]
    fn buyer_cannot_pass_admin_gate() {
        let buyer = Actor::buyer(UserId::new());
        assert!(authorize(&buyer, Gate::AdminOrBuyer).is_ok());
        assert_eq!(
            authorize(&buyer, Gate::Admin),
            Err(AuthzError::Forbidden {
                role: ActorRole::Buyer,
                gate: Gate::Admin
            })
        );
    }

    #[test]
    fn seller_lane_gate() {
        let seller = Actor::seller(UserId::new());
        assert!(authorize(&seller, Gate::AdminOrSeller).is_ok());
        assert!(authorize(&seller, Gate::AdminOrBuyer).is_err());
        assert!(authorize(&seller, Gate::Authenticated).is_ok());
    }
}
