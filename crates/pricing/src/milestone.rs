//! Payment milestones, payment types, and the pricing dispatch table.

use serde::{Deserialize, Serialize};

use inflow_core::{DomainResult, InvalidPricingInput};

/// A named payment checkpoint of an order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Milestone {
    #[serde(rename = "deposit")]
    Deposit,
    #[serde(rename = "first_payment")]
    First,
    #[serde(rename = "second_payment")]
    Second,
    #[serde(rename = "final_payment")]
    Final,
}

impl Milestone {
    pub const ALL: [Milestone; 4] = [
        Milestone::Deposit,
        Milestone::First,
        Milestone::Second,
        Milestone::Final,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Milestone::Deposit => "deposit",
            Milestone::First => "first_payment",
            Milestone::Second => "second_payment",
            Milestone::Final => "final_payment",
        }
    }
}

impl core::fmt::Display for Milestone {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    #[default]
    BankTransfer,
    Card,
}

/// What the transaction fee is computed on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FeeBase {
    None,
    Subtotal,
    SubtotalAndShipping,
}

/// Pricing behaviour of one (milestone, payment type) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PricingRule {
    pub fee_base: FeeBase,
}

/// The single dispatch table for milestone pricing.
pub fn pricing_rule(milestone: Milestone, payment_type: PaymentType) -> PricingRule {
    use FeeBase::*;
    use Milestone::*;
    use PaymentType::*;

    let fee_base = match (milestone, payment_type) {
        (Deposit, _) => None,
        (First | Second, BankTransfer) => None,
        (First | Second, Card) => Subtotal,
        (Final, BankTransfer) => None,
        (Final, Card) => SubtotalAndShipping,
    };
    PricingRule { fee_base }
}

/// Percentages of the order subtotal due at the upfront milestones.
///
/// The final milestone takes whatever is left, so the three always sum to 100.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestonePlan {
    pub first_percentage: u32,
    #[serde(default)]
    pub second_percentage: u32,
}

impl MilestonePlan {
    pub fn new(first_percentage: u32, second_percentage: u32) -> DomainResult<Self> {
        let plan = Self {
            first_percentage,
            second_percentage,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.first_percentage > 100 || self.second_percentage > 100 {
            return Err(InvalidPricingInput::Percentage(format!(
                "percentages must be within 0..=100 (first: {}, second: {})",
                self.first_percentage, self.second_percentage
            ))
            .into());
        }
        if self.first_percentage + self.second_percentage > 100 {
            return Err(InvalidPricingInput::Percentage(format!(
                "first + second exceeds 100 ({} + {})",
                self.first_percentage, self.second_percentage
            ))
            .into());
        }
        Ok(())
    }

    pub fn final_percentage(&self) -> u32 {
        100u32.saturating_sub(self.first_percentage + self.second_percentage)
    }

    pub fn percentage(&self, milestone: Milestone) -> u32 {
        match milestone {
            Milestone::Deposit => 0,
            Milestone::First => self.first_percentage,
            Milestone::Second => self.second_percentage,
            Milestone::Final => self.final_percentage(),
        }
    }

    pub fn skips_first_payment(&self) -> bool {
        self.first_percentage == 0
    }

    pub fn has_second_payment(&self) -> bool {
        self.second_percentage > 0
    }
}

/// Payment type chosen per milestone.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestonePaymentTypes {
    pub first: PaymentType,
    pub second: PaymentType,
    #[serde(rename = "final")]
    pub final_: PaymentType,
}

impl MilestonePaymentTypes {
    pub fn get(&self, milestone: Milestone) -> PaymentType {
        match milestone {
            Milestone::Deposit => PaymentType::BankTransfer,
            Milestone::First => self.first,
            Milestone::Second => self.second,
            Milestone::Final => self.final_,
        }
    }

    pub fn set(&mut self, milestone: Milestone, payment_type: PaymentType) {
        match milestone {
            Milestone::Deposit => {}
            Milestone::First => self.first = payment_type,
            Milestone::Second => self.second = payment_type,
            Milestone::Final => self.final_ = payment_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::DomainError;

    #[test]
    fn only_card_pays_a_fee() {
        for m in Milestone::ALL {
            assert_eq!(pricing_rule(m, PaymentType::BankTransfer).fee_base, FeeBase::None);
        }
        assert_eq!(pricing_rule(Milestone::First, PaymentType::Card).fee_base, FeeBase::Subtotal);
        assert_eq!(
            pricing_rule(Milestone::Final, PaymentType::Card).fee_base,
            FeeBase::SubtotalAndShipping
        );
        assert_eq!(pricing_rule(Milestone::Deposit, PaymentType::Card).fee_base, FeeBase::None);
    }

    #[test]
    fn plan_rejects_over_allocation() {
        assert!(MilestonePlan::new(30, 20).is_ok());
        match MilestonePlan::new(70, 40) {
            Err(DomainError::Pricing(InvalidPricingInput::Percentage(_))) => {}
            other => panic!("Expected Percentage error, got {other:?}"),
        }
        assert!(MilestonePlan::new(101, 0).is_err());
    }

    #[test]
    fn final_takes_the_remainder() {
        let plan = MilestonePlan::new(30, 20).unwrap();
        assert_eq!(plan.final_percentage(), 50);
        assert_eq!(
            plan.percentage(Milestone::First) + plan.percentage(Milestone::Second) + plan.percentage(Milestone::Final),
            100
        );
    }

    #[test]
    fn milestone_serializes_with_payment_suffix() {
        assert_eq!(serde_json::to_value(Milestone::Final).unwrap(), "final_payment");
        assert_eq!(serde_json::to_value(PaymentType::BankTransfer).unwrap(), "bank_transfer");
    }
}
