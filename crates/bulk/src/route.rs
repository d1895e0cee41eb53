//! Milestone × payment type dispatch table for bulk checkout.
//!
//! Pricing behaviour lives in `inflow_pricing::milestone::pricing_rule`; this
//! table adds the tracking side. Adding a milestone means one row here and one
//! row there.

use inflow_payments::TransactionStatus;
use inflow_pricing::milestone::{PricingRule, pricing_rule};
use inflow_pricing::{Milestone, PaymentType};

use crate::tracking::{BulkTrackingStatus, milestone_stages};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PaymentRoute {
    pub milestone: Milestone,
    pub payment_type: PaymentType,
    /// Stage the milestone can be checked out from; `None` for deposits.
    pub payable_from: Option<BulkTrackingStatus>,
    /// Stage after checkout, before settlement. Only bank transfers wait here.
    pub submitted: Option<BulkTrackingStatus>,
    pub settled: Option<BulkTrackingStatus>,
    /// Status written on the transaction created at checkout.
    pub checkout_status: TransactionStatus,
    pub pricing: PricingRule,
}

pub fn payment_route(milestone: Milestone, payment_type: PaymentType) -> PaymentRoute {
    let stages = milestone_stages(milestone);
    let (submitted, checkout_status) = match payment_type {
        PaymentType::BankTransfer => (stages.map(|s| s.submitted), TransactionStatus::WaitingConfirm),
        PaymentType::Card => (None, TransactionStatus::Paid),
    };

    PaymentRoute {
        milestone,
        payment_type,
        payable_from: stages.map(|s| s.payable),
        submitted,
        settled: stages.map(|s| s.settled),
        checkout_status,
        pricing: pricing_rule(milestone, payment_type),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_pricing::milestone::FeeBase;

    #[test]
    fn card_settles_without_a_confirm_stage() {
        let route = payment_route(Milestone::First, PaymentType::Card);
        assert_eq!(route.payable_from, Some(BulkTrackingStatus::FirstPayment));
        assert_eq!(route.submitted, None);
        assert_eq!(route.settled, Some(BulkTrackingStatus::FirstPaymentConfirmed));
        assert_eq!(route.checkout_status, TransactionStatus::Paid);
        assert_eq!(route.pricing.fee_base, FeeBase::Subtotal);
    }

    #[test]
    fn bank_transfer_waits_for_confirmation() {
        let route = payment_route(Milestone::Final, PaymentType::BankTransfer);
        assert_eq!(route.submitted, Some(BulkTrackingStatus::FinalPaymentConfirm));
        assert_eq!(route.checkout_status, TransactionStatus::WaitingConfirm);
        assert_eq!(route.pricing.fee_base, FeeBase::None);
    }

    #[test]
    fn deposits_have_no_stages() {
        let route = payment_route(Milestone::Deposit, PaymentType::BankTransfer);
        assert_eq!(route.payable_from, None);
        assert_eq!(route.settled, None);
    }
}
