use serde::{Deserialize, Serialize};

use inflow_core::fsm::rejected;
use inflow_core::{DomainError, DomainResult, StateMachine};

/// Payment status of a sample order.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    WaitingConfirm,
    Paid,
    Unpaid,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PaymentTrigger {
    /// Buyer submitted a bank transfer.
    SubmitTransfer,
    /// Card success or admin mark-paid.
    Settle,
    /// Admin rejected a submitted transfer.
    Reject,
}

impl PaymentStatus {
    /// Guard shared by every checkout path.
    pub fn ensure_checkout_allowed(self) -> DomainResult<()> {
        match self {
            PaymentStatus::Paid => Err(DomainError::already_paid("order is already paid")),
            PaymentStatus::WaitingConfirm => Err(DomainError::invalid_state(
                "a payment is already waiting for confirmation",
            )),
            PaymentStatus::Pending | PaymentStatus::Unpaid => Ok(()),
        }
    }
}

impl StateMachine for PaymentStatus {
    type Trigger = PaymentTrigger;

    fn transition(self, trigger: PaymentTrigger) -> DomainResult<Self> {
        use PaymentStatus::*;
        use PaymentTrigger::*;

        match (self, trigger) {
            (Paid, _) => Err(DomainError::already_paid("order is already paid")),
            (Pending | Unpaid, SubmitTransfer) => Ok(WaitingConfirm),
            (Pending | Unpaid | WaitingConfirm, Settle) => Ok(Paid),
            (WaitingConfirm, Reject) => Ok(Unpaid),
            (state, trigger) => Err(rejected(state, trigger)),
        }
    }
}

/// Production tracking of a sample order.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoTrackingStatus {
    #[default]
    New,
    DesignApproved,
    DesignRejected,
    RawMaterial,
    Making,
    Submit,
    Delivering,
    DeliveryConfirmed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoTrackingTrigger {
    ApproveDesign,
    RejectDesign,
    UpdateRawMaterial,
    MarkMaking,
    MarkSubmit,
    MarkDelivering,
    ConfirmDelivered,
}

impl StateMachine for PoTrackingStatus {
    type Trigger = PoTrackingTrigger;

    fn transition(self, trigger: PoTrackingTrigger) -> DomainResult<Self> {
        use PoTrackingStatus::*;
        use PoTrackingTrigger::*;

        match (self, trigger) {
            (New | DesignRejected, ApproveDesign) => Ok(DesignApproved),
            (New, RejectDesign) => Ok(DesignRejected),
            (DesignApproved | RawMaterial, UpdateRawMaterial) => Ok(RawMaterial),
            (DesignApproved | RawMaterial, MarkMaking) => Ok(Making),
            (Making, MarkSubmit) => Ok(Submit),
            (Making | Submit, MarkDelivering) => Ok(Delivering),
            (Delivering, ConfirmDelivered) => Ok(DeliveryConfirmed),
            (state, trigger) => Err(rejected(state, trigger)),
        }
    }
}
