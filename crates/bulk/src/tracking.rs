//! Bulk order tracking status and its single transition function.
//!
//! Variants are declared in lifecycle order and the derived `Ord` is the
//! ordinal used by the monotonicity rule: every trigger except `Reset`
//! yields a status at or after the current one.

use serde::{Deserialize, Serialize};

use inflow_core::fsm::rejected;
use inflow_core::{DomainResult, StateMachine};
use inflow_pricing::Milestone;

#[derive(
    Debug, Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BulkTrackingStatus {
    #[default]
    New,
    WaitingForSubmitOrder,
    WaitingForQuotation,
    FirstPayment,
    FirstPaymentConfirm,
    FirstPaymentConfirmed,
    SecondPayment,
    SecondPaymentConfirm,
    SecondPaymentConfirmed,
    RawMaterial,
    Pps,
    Production,
    Qc,
    Submit,
    FinalPayment,
    FinalPaymentConfirm,
    FinalPaymentConfirmed,
    Delivering,
    Delivered,
    DeliveryConfirmed,
}

impl BulkTrackingStatus {
    pub const ALL: [BulkTrackingStatus; 20] = [
        BulkTrackingStatus::New,
        BulkTrackingStatus::WaitingForSubmitOrder,
        BulkTrackingStatus::WaitingForQuotation,
        BulkTrackingStatus::FirstPayment,
        BulkTrackingStatus::FirstPaymentConfirm,
        BulkTrackingStatus::FirstPaymentConfirmed,
        BulkTrackingStatus::SecondPayment,
        BulkTrackingStatus::SecondPaymentConfirm,
        BulkTrackingStatus::SecondPaymentConfirmed,
        BulkTrackingStatus::RawMaterial,
        BulkTrackingStatus::Pps,
        BulkTrackingStatus::Production,
        BulkTrackingStatus::Qc,
        BulkTrackingStatus::Submit,
        BulkTrackingStatus::FinalPayment,
        BulkTrackingStatus::FinalPaymentConfirm,
        BulkTrackingStatus::FinalPaymentConfirmed,
        BulkTrackingStatus::Delivering,
        BulkTrackingStatus::Delivered,
        BulkTrackingStatus::DeliveryConfirmed,
    ];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Stages from which production work (checklists, QC) may be recorded.
    fn in_production_window(self) -> bool {
        use BulkTrackingStatus::*;
        matches!(self, FirstPaymentConfirmed | SecondPaymentConfirmed) || self >= RawMaterial
    }
}

/// Tracking stages of one payable milestone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MilestoneStages {
    pub payable: BulkTrackingStatus,
    /// Reached after a bank transfer is submitted.
    pub submitted: BulkTrackingStatus,
    pub settled: BulkTrackingStatus,
}

/// Deposits have no stages.
pub fn milestone_stages(milestone: Milestone) -> Option<MilestoneStages> {
    use BulkTrackingStatus::*;

    let (payable, submitted, settled) = match milestone {
        Milestone::Deposit => return None,
        Milestone::First => (FirstPayment, FirstPaymentConfirm, FirstPaymentConfirmed),
        Milestone::Second => (SecondPayment, SecondPaymentConfirm, SecondPaymentConfirmed),
        Milestone::Final => (FinalPayment, FinalPaymentConfirm, FinalPaymentConfirmed),
    };
    Some(MilestoneStages {
        payable,
        submitted,
        settled,
    })
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "trigger", content = "value")]
pub enum BulkTrackingTrigger {
    RequestSubmission,
    SubmitOrder,
    SendQuotation,
    SkipFirstPayment,
    SubmitPayment(Milestone),
    ConfirmPayment(Milestone),
    RequestSecondPayment,
    UpdateRawMaterial,
    UpdatePps,
    UpdateProduction,
    CreateQcReport,
    SubmitGoods,
    MarkFinalPayment,
    MarkDelivering,
    MarkDelivered,
    ConfirmDelivered,
    /// Admin manual set, forward only.
    Advance(BulkTrackingStatus),
    Reset,
}

impl StateMachine for BulkTrackingStatus {
    type Trigger = BulkTrackingTrigger;

    fn transition(self, trigger: BulkTrackingTrigger) -> DomainResult<Self> {
        use BulkTrackingStatus::*;
        use BulkTrackingTrigger as T;

        let next = match (self, trigger) {
            (_, T::Reset) => New,

            (New, T::RequestSubmission) => WaitingForSubmitOrder,
            (New | WaitingForSubmitOrder, T::SubmitOrder) => WaitingForQuotation,
            (WaitingForQuotation | FirstPayment, T::SendQuotation) => FirstPayment,
            (WaitingForQuotation | FirstPayment, T::SkipFirstPayment) => FirstPaymentConfirmed,

            (current, T::SubmitPayment(m)) => match milestone_stages(m) {
                None => current,
                Some(s) if current == s.payable || current == s.submitted => s.submitted,
                Some(_) => return Err(rejected(current, trigger)),
            },
            (current, T::ConfirmPayment(m)) => match milestone_stages(m) {
                None => current,
                Some(s) if current >= s.payable => current.max(s.settled),
                Some(_) => return Err(rejected(current, trigger)),
            },

            (FirstPaymentConfirmed, T::RequestSecondPayment) => SecondPayment,

            (current, T::UpdateRawMaterial) if current.in_production_window() => current.max(RawMaterial),
            (current, T::UpdatePps) if current.in_production_window() => current.max(Pps),
            (current, T::UpdateProduction) if current.in_production_window() => current.max(Production),
            (current, T::CreateQcReport) if current.in_production_window() => current.max(Qc),

            (Qc, T::SubmitGoods) => Submit,
            (current, T::MarkFinalPayment)
                if current.in_production_window() && current <= FinalPayment =>
            {
                FinalPayment
            }
            (FinalPaymentConfirm | FinalPaymentConfirmed, T::MarkDelivering) => Delivering,
            (Delivering, T::MarkDelivered) => Delivered,
            (Delivering | Delivered, T::ConfirmDelivered) => DeliveryConfirmed,

            (current, T::Advance(target)) if target >= current => target,

            (state, trigger) => return Err(rejected(state, trigger)),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::DomainError;
    use proptest::prelude::*;

    #[test]
    fn ordinal_follows_declaration() {
        for pair in BulkTrackingStatus::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].ordinal() + 1, pair[1].ordinal());
        }
    }

    #[test]
    fn zero_percent_quotation_skips_to_confirmed() {
        let next = BulkTrackingStatus::WaitingForQuotation
            .transition(BulkTrackingTrigger::SkipFirstPayment)
            .unwrap();
        assert_eq!(next, BulkTrackingStatus::FirstPaymentConfirmed);
    }

    #[test]
    fn bank_transfer_final_payment_moves_to_confirm() {
        let next = BulkTrackingStatus::FinalPayment
            .transition(BulkTrackingTrigger::SubmitPayment(Milestone::Final))
            .unwrap();
        assert_eq!(next, BulkTrackingStatus::FinalPaymentConfirm);

        // Resubmission after a rejected transfer is accepted from the confirm stage.
        assert_eq!(
            next.transition(BulkTrackingTrigger::SubmitPayment(Milestone::Final)).unwrap(),
            BulkTrackingStatus::FinalPaymentConfirm
        );
    }

    #[test]
    fn payment_cannot_be_submitted_before_its_stage() {
        match BulkTrackingStatus::RawMaterial.transition(BulkTrackingTrigger::SubmitPayment(Milestone::Final)) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn confirm_after_delivery_started_keeps_tracking() {
        let next = BulkTrackingStatus::Delivering
            .transition(BulkTrackingTrigger::ConfirmPayment(Milestone::Final))
            .unwrap();
        assert_eq!(next, BulkTrackingStatus::Delivering);
    }

    #[test]
    fn checklist_updates_never_regress() {
        let next = BulkTrackingStatus::Production
            .transition(BulkTrackingTrigger::UpdateRawMaterial)
            .unwrap();
        assert_eq!(next, BulkTrackingStatus::Production);
        assert!(!BulkTrackingStatus::FirstPayment.can(BulkTrackingTrigger::UpdateRawMaterial));
    }

    #[test]
    fn manual_advance_is_forward_only() {
        assert!(BulkTrackingStatus::Qc
            .transition(BulkTrackingTrigger::Advance(BulkTrackingStatus::Pps))
            .is_err());
        assert_eq!(
            BulkTrackingStatus::Qc
                .transition(BulkTrackingTrigger::Advance(BulkTrackingStatus::Delivering))
                .unwrap(),
            BulkTrackingStatus::Delivering
        );
    }

    fn any_status() -> impl Strategy<Value = BulkTrackingStatus> {
        (0..BulkTrackingStatus::ALL.len()).prop_map(|i| BulkTrackingStatus::ALL[i])
    }

    fn any_milestone() -> impl Strategy<Value = Milestone> {
        (0..Milestone::ALL.len()).prop_map(|i| Milestone::ALL[i])
    }

    fn any_trigger() -> impl Strategy<Value = BulkTrackingTrigger> {
        use BulkTrackingTrigger as T;
        prop_oneof![
            Just(T::RequestSubmission),
            Just(T::SubmitOrder),
            Just(T::SendQuotation),
            Just(T::SkipFirstPayment),
            any_milestone().prop_map(T::SubmitPayment),
            any_milestone().prop_map(T::ConfirmPayment),
            Just(T::RequestSecondPayment),
            Just(T::UpdateRawMaterial),
            Just(T::UpdatePps),
            Just(T::UpdateProduction),
            Just(T::CreateQcReport),
            Just(T::SubmitGoods),
            Just(T::MarkFinalPayment),
            Just(T::MarkDelivering),
            Just(T::MarkDelivered),
            Just(T::ConfirmDelivered),
            any_status().prop_map(T::Advance),
            Just(T::Reset),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn tracking_only_regresses_on_reset(
            start in any_status(),
            triggers in proptest::collection::vec(any_trigger(), 1..40),
        ) {
            let mut current = start;
            for trigger in triggers {
                if let Ok(next) = current.transition(trigger) {
                    if trigger == BulkTrackingTrigger::Reset {
                        prop_assert_eq!(next, BulkTrackingStatus::New);
                    } else {
                        prop_assert!(next >= current, "{:?} -> {:?} via {:?}", current, next, trigger);
                    }
                    current = next;
                }
            }
        }
    }
}
