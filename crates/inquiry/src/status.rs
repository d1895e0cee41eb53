use serde::{Deserialize, Serialize};

use inflow_core::fsm::rejected;
use inflow_core::{DomainResult, StateMachine};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InquiryStatus {
    New,
    QuoteInProcess,
    Finished,
    Closed,
    Canceled,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InquiryTrigger {
    SubmitQuotation,
    Finish,
    Close,
    Cancel,
}

impl StateMachine for InquiryStatus {
    type Trigger = InquiryTrigger;

    fn transition(self, trigger: InquiryTrigger) -> DomainResult<Self> {
        use InquiryStatus::*;
        use InquiryTrigger::*;

        match (self, trigger) {
            (New | QuoteInProcess, SubmitQuotation) => Ok(QuoteInProcess),
            (New | QuoteInProcess, Finish) => Ok(Finished),
            (New | QuoteInProcess, Close) => Ok(Closed),
            (New, Cancel) => Ok(Canceled),
            (state, trigger) => Err(rejected(state, trigger)),
        }
    }
}

impl InquiryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, InquiryStatus::Finished | InquiryStatus::Closed | InquiryStatus::Canceled)
    }
}

/// The buyer's decision on the latest quotation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuyerQuotationStatus {
    New,
    WaitingForApproval,
    Approved,
    Rejected,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BuyerQuotationTrigger {
    Quote,
    Approve,
    Reject,
}

impl StateMachine for BuyerQuotationStatus {
    type Trigger = BuyerQuotationTrigger;

    fn transition(self, trigger: BuyerQuotationTrigger) -> DomainResult<Self> {
        use BuyerQuotationStatus::*;
        use BuyerQuotationTrigger::*;

        match (self, trigger) {
            (New | WaitingForApproval | Rejected, Quote) => Ok(WaitingForApproval),
            (WaitingForApproval, Approve) => Ok(Approved),
            (WaitingForApproval, Reject) => Ok(Rejected),
            (state, trigger) => Err(rejected(state, trigger)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::DomainError;

    #[test]
    fn rejected_quotation_can_be_requoted() {
        let status = BuyerQuotationStatus::New
            .transition(BuyerQuotationTrigger::Quote)
            .and_then(|s| s.transition(BuyerQuotationTrigger::Reject))
            .and_then(|s| s.transition(BuyerQuotationTrigger::Quote))
            .unwrap();
        assert_eq!(status, BuyerQuotationStatus::WaitingForApproval);
    }

    #[test]
    fn approved_quotation_is_final() {
        assert!(!BuyerQuotationStatus::Approved.can(BuyerQuotationTrigger::Quote));
        assert!(!BuyerQuotationStatus::Approved.can(BuyerQuotationTrigger::Reject));
    }

    #[test]
    fn cancel_only_from_new() {
        assert_eq!(
            InquiryStatus::New.transition(InquiryTrigger::Cancel).unwrap(),
            InquiryStatus::Canceled
        );
        match InquiryStatus::QuoteInProcess.transition(InquiryTrigger::Cancel) {
            Err(DomainError::InvalidState(_)) => {}
            other => panic!("Expected InvalidState, got {other:?}"),
        }
    }

    #[test]
    fn terminal_states_accept_nothing() {
        for state in [InquiryStatus::Finished, InquiryStatus::Closed, InquiryStatus::Canceled] {
            assert!(state.is_terminal());
            for trigger in [
                InquiryTrigger::SubmitQuotation,
                InquiryTrigger::Finish,
                InquiryTrigger::Close,
                InquiryTrigger::Cancel,
            ] {
                assert!(!state.can(trigger));
            }
        }
    }
}
