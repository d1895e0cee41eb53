use serde::{Deserialize, Serialize};

use inflow_core::fsm::rejected;
use inflow_core::{DomainResult, StateMachine, UserId};

/// Who fulfils a bulk order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SellerRef {
    /// Fulfilled by the platform itself.
    Platform,
    Seller(UserId),
}

impl SellerRef {
    pub fn seller_id(self) -> Option<UserId> {
        match self {
            SellerRef::Platform => None,
            SellerRef::Seller(id) => Some(id),
        }
    }
}

/// Supplier-side document lane, independent of buyer tracking.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SellerTrackingStatus {
    Po,
    PoRejected,
    WaitingFirstPayment,
    FirstPaymentSkipped,
    FirstPaymentConfirmed,
    RawMaterial,
    Pps,
    Production,
    Qc,
    FinalPaymentConfirmed,
    Delivering,
    Delivered,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SellerTrigger {
    Accept,
    Reject,
    Advance(SellerTrackingStatus),
}

impl StateMachine for SellerTrackingStatus {
    type Trigger = SellerTrigger;

    fn transition(self, trigger: SellerTrigger) -> DomainResult<Self> {
        use SellerTrackingStatus::*;

        match (self, trigger) {
            (Po, SellerTrigger::Accept) => Ok(WaitingFirstPayment),
            (Po, SellerTrigger::Reject) => Ok(PoRejected),
            (current, SellerTrigger::Advance(target))
                if current != Po && current != PoRejected && target > current && target != PoRejected =>
            {
                Ok(target)
            }
            (state, trigger) => Err(rejected(state, trigger)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seller_must_answer_the_po_first() {
        assert!(SellerTrackingStatus::Po
            .transition(SellerTrigger::Advance(SellerTrackingStatus::RawMaterial))
            .is_err());
        let accepted = SellerTrackingStatus::Po.transition(SellerTrigger::Accept).unwrap();
        assert_eq!(accepted, SellerTrackingStatus::WaitingFirstPayment);
        assert_eq!(
            accepted
                .transition(SellerTrigger::Advance(SellerTrackingStatus::RawMaterial))
                .unwrap(),
            SellerTrackingStatus::RawMaterial
        );
    }

    #[test]
    fn rejected_po_is_terminal_for_the_lane() {
        let rejected = SellerTrackingStatus::Po.transition(SellerTrigger::Reject).unwrap();
        assert!(!rejected.can(SellerTrigger::Accept));
        assert!(!rejected.can(SellerTrigger::Advance(SellerTrackingStatus::Delivered)));
    }

    #[test]
    fn advance_is_forward_only() {
        assert!(!SellerTrackingStatus::Qc.can(SellerTrigger::Advance(SellerTrackingStatus::Pps)));
        assert!(!SellerTrackingStatus::Qc.can(SellerTrigger::Advance(SellerTrackingStatus::Qc)));
    }
}
