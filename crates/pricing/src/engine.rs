//! The pricing engine.
//!
//! Sample orders are one payment: subtotal + shipping + tax + card fee.
//! Bulk orders split the subtotal across up to three milestones. The first and
//! second take their percentage of the subtotal (with tax and fee on that
//! share); the final milestone takes everything else, including shipping,
//! deposit and sample deductions, and absorbs every rounding remainder. That
//! makes `first + second + final + deposit == total` exact by construction.
//! Deposit and sample credits may not exceed what the final milestone carries.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use inflow_core::{Currency, DomainResult, InvalidPricingInput, round_money};

use crate::cart::{AdditionalItem, CartItem, CommercialInvoice};
use crate::fees::FeeSchedule;
use crate::milestone::{
    FeeBase, Milestone, MilestonePaymentTypes, MilestonePlan, PaymentType, pricing_rule,
};
use crate::quotation::{Quotation, QuotationKind};

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

#[derive(Debug, Clone)]
pub struct SamplePricingInput<'a> {
    pub currency: Currency,
    pub items: &'a [CartItem],
    pub quotations: &'a [Quotation],
    pub tax_percentage: Decimal,
    pub shipping_fee: Decimal,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone)]
pub struct BulkPricingInput<'a> {
    pub currency: Currency,
    pub items: &'a [CartItem],
    pub quotations: &'a [Quotation],
    pub tax_percentage: Decimal,
    pub shipping_fee: Decimal,
    pub plan: MilestonePlan,
    pub payment_types: MilestonePaymentTypes,
    pub commercial_invoice: Option<&'a CommercialInvoice>,
    pub additional_items: &'a [AdditionalItem],
    /// Amount already taken as a deposit.
    pub deposit: Decimal,
    /// Paid sample subtotal credited against the final payment.
    pub sample_deduction: Decimal,
}

/// Priced sample order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub currency: Currency,
    pub payment_type: PaymentType,
    pub items: Vec<CartItem>,
    pub sub_total: Decimal,
    pub shipping_fee: Decimal,
    pub tax_percentage: Decimal,
    pub tax: Decimal,
    pub transaction_fee: Decimal,
    pub total: Decimal,
}

/// Amounts due at one milestone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneAmounts {
    pub percentage: u32,
    pub payment_type: PaymentType,
    pub sub_total: Decimal,
    pub shipping_fee: Decimal,
    pub tax: Decimal,
    pub transaction_fee: Decimal,
    pub deduction: Decimal,
    pub total: Decimal,
}

/// Priced bulk order with its milestone split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkPricing {
    pub currency: Currency,
    pub items: Vec<CartItem>,
    pub additional_items: Vec<AdditionalItem>,
    pub sub_total: Decimal,
    pub sub_total_after_deduction: Decimal,
    pub shipping_fee: Decimal,
    pub tax_percentage: Decimal,
    pub tax: Decimal,
    pub transaction_fee: Decimal,
    pub deposit: Decimal,
    pub sample_deduction: Decimal,
    pub total: Decimal,
    pub plan: MilestonePlan,
    pub first: MilestoneAmounts,
    pub second: MilestoneAmounts,
    #[serde(rename = "final")]
    pub final_: MilestoneAmounts,
}

impl BulkPricing {
    pub fn milestone(&self, milestone: Milestone) -> Option<&MilestoneAmounts> {
        match milestone {
            Milestone::Deposit => None,
            Milestone::First => Some(&self.first),
            Milestone::Second => Some(&self.second),
            Milestone::Final => Some(&self.final_),
        }
    }

    /// Amount the buyer is charged at `milestone`.
    pub fn amount_due(&self, milestone: Milestone) -> Decimal {
        match self.milestone(milestone) {
            Some(amounts) => amounts.total,
            None => self.deposit,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    fee_overrides: HashMap<Currency, FeeSchedule>,
}

impl PricingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fee_schedule(mut self, currency: Currency, schedule: FeeSchedule) -> Self {
        self.fee_overrides.insert(currency, schedule);
        self
    }

    pub fn fee_schedule(&self, currency: Currency) -> FeeSchedule {
        self.fee_overrides
            .get(&currency)
            .copied()
            .unwrap_or_else(|| FeeSchedule::for_currency(currency))
    }

    /// Prices each line, falling back to the quoted price for unpriced lines.
    pub fn resolve_items(
        &self,
        items: &[CartItem],
        quotations: &[Quotation],
        kind: QuotationKind,
    ) -> DomainResult<Vec<CartItem>> {
        if items.is_empty() {
            return Err(InvalidPricingInput::EmptyCart.into());
        }
        let fallback = Quotation::find(quotations, kind).map(|q| q.price);

        items
            .iter()
            .enumerate()
            .map(|(line, item)| -> DomainResult<CartItem> {
                if item.qty <= 0 {
                    return Err(InvalidPricingInput::NonPositiveQuantity { line }.into());
                }
                let unit_price = if item.unit_price > Decimal::ZERO {
                    item.unit_price
                } else {
                    fallback.ok_or(InvalidPricingInput::MissingQuotation(kind.as_str()))?
                };
                let mut priced = item.clone();
                priced.unit_price = unit_price;
                priced.total_price = round_money(unit_price * Decimal::from(item.qty));
                Ok(priced)
            })
            .collect()
    }

    pub fn price_sample(&self, input: &SamplePricingInput<'_>) -> DomainResult<PricingSnapshot> {
        non_negative(input.shipping_fee, "shipping_fee")?;
        non_negative(input.tax_percentage, "tax_percentage")?;

        let items = self.resolve_items(input.items, input.quotations, QuotationKind::Sample)?;
        let sub_total = sum(items.iter().map(|i| i.total_price));
        let taxable = sub_total + input.shipping_fee;
        let tax = round_money(taxable * input.tax_percentage / HUNDRED);

        let rule = pricing_rule(Milestone::Final, input.payment_type);
        let transaction_fee = self.fee(input.currency, rule.fee_base, sub_total, input.shipping_fee);

        Ok(PricingSnapshot {
            currency: input.currency,
            payment_type: input.payment_type,
            items,
            sub_total,
            shipping_fee: input.shipping_fee,
            tax_percentage: input.tax_percentage,
            tax,
            transaction_fee,
            total: sub_total + input.shipping_fee + tax + transaction_fee,
        })
    }

    pub fn price_bulk(&self, input: &BulkPricingInput<'_>) -> DomainResult<BulkPricing> {
        input.plan.validate()?;
        non_negative(input.deposit, "deposit")?;
        non_negative(input.sample_deduction, "sample_deduction")?;

        let items = self.resolve_items(input.items, input.quotations, QuotationKind::Bulk)?;
        let additional_items = input
            .additional_items
            .iter()
            .enumerate()
            .map(|(line, item)| -> DomainResult<AdditionalItem> {
                if item.qty <= 0 {
                    return Err(InvalidPricingInput::NonPositiveQuantity { line }.into());
                }
                let mut priced = item.clone();
                priced.total_price = round_money(item.unit_price * Decimal::from(item.qty));
                Ok(priced)
            })
            .collect::<DomainResult<Vec<_>>>()?;
        let additional_total = sum(additional_items.iter().map(|i| i.total_price));

        let sub_total = sum(items.iter().map(|i| i.total_price)) + additional_total;
        let (sub_total_after_deduction, tax_percentage, shipping_fee) = match input.commercial_invoice {
            Some(invoice) => (
                round_money(invoice.sub_total + additional_total),
                invoice.tax_percentage,
                invoice.shipping_fee,
            ),
            None => (sub_total, input.tax_percentage, input.shipping_fee),
        };
        non_negative(shipping_fee, "shipping_fee")?;
        non_negative(tax_percentage, "tax_percentage")?;

        let upfront = |milestone: Milestone| -> MilestoneAmounts {
            let percentage = input.plan.percentage(milestone);
            let payment_type = input.payment_types.get(milestone);
            let sub = round_money(sub_total * Decimal::from(percentage) / HUNDRED);
            let tax = round_money(sub * tax_percentage / HUNDRED);
            let fee = self.fee(
                input.currency,
                pricing_rule(milestone, payment_type).fee_base,
                sub,
                Decimal::ZERO,
            );
            MilestoneAmounts {
                percentage,
                payment_type,
                sub_total: sub,
                shipping_fee: Decimal::ZERO,
                tax,
                transaction_fee: fee,
                deduction: Decimal::ZERO,
                total: sub + tax + fee,
            }
        };
        let first = upfront(Milestone::First);
        let second = upfront(Milestone::Second);

        let tax = round_money((sub_total_after_deduction + shipping_fee) * tax_percentage / HUNDRED);
        let final_type = input.payment_types.get(Milestone::Final);
        let remainder = sub_total_after_deduction - first.sub_total - second.sub_total;
        if input.deposit > remainder {
            return Err(InvalidPricingInput::CreditsExceedFinal {
                credits: input.deposit,
                remaining: remainder,
            }
            .into());
        }
        let final_sub = remainder - input.deposit;
        let final_tax = tax - first.tax - second.tax;
        let final_fee = self.fee(
            input.currency,
            pricing_rule(Milestone::Final, final_type).fee_base,
            final_sub,
            shipping_fee,
        );
        let final_due = final_sub + shipping_fee + final_tax + final_fee;
        if input.sample_deduction > final_due {
            return Err(InvalidPricingInput::CreditsExceedFinal {
                credits: input.deposit + input.sample_deduction,
                remaining: remainder + shipping_fee + final_tax + final_fee,
            }
            .into());
        }
        let final_ = MilestoneAmounts {
            percentage: input.plan.final_percentage(),
            payment_type: final_type,
            sub_total: final_sub,
            shipping_fee,
            tax: final_tax,
            transaction_fee: final_fee,
            deduction: input.sample_deduction,
            total: final_due - input.sample_deduction,
        };

        let transaction_fee = first.transaction_fee + second.transaction_fee + final_.transaction_fee;
        let total = first.total + second.total + final_.total + input.deposit;

        Ok(BulkPricing {
            currency: input.currency,
            items,
            additional_items,
            sub_total,
            sub_total_after_deduction,
            shipping_fee,
            tax_percentage,
            tax,
            transaction_fee,
            deposit: input.deposit,
            sample_deduction: input.sample_deduction,
            total,
            plan: input.plan,
            first,
            second,
            final_,
        })
    }

    fn fee(&self, currency: Currency, base: FeeBase, sub_total: Decimal, shipping: Decimal) -> Decimal {
        let amount = match base {
            FeeBase::None => return Decimal::ZERO,
            FeeBase::Subtotal => sub_total,
            FeeBase::SubtotalAndShipping => sub_total + shipping,
        };
        if amount <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.fee_schedule(currency).fee_on(amount)
    }
}

fn sum(values: impl Iterator<Item = Decimal>) -> Decimal {
    values.fold(Decimal::ZERO, |acc, v| acc + v)
}

fn non_negative(value: Decimal, field: &'static str) -> DomainResult<()> {
    if value < Decimal::ZERO {
        return Err(InvalidPricingInput::NegativeAmount(field).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflow_core::DomainError;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_items() -> Vec<CartItem> {
        vec![
            CartItem::new("M", "red", 10, dec!(12.50)),
            CartItem::new("L", "red", 5, Decimal::ZERO),
        ]
    }

    fn test_quotations() -> Vec<Quotation> {
        vec![
            Quotation {
                kind: QuotationKind::Sample,
                price: dec!(20),
                lead_time_days: 7,
                accepted: false,
            },
            Quotation {
                kind: QuotationKind::Bulk,
                price: dec!(8),
                lead_time_days: 30,
                accepted: false,
            },
        ]
    }

    fn bulk_input<'a>(
        items: &'a [CartItem],
        quotations: &'a [Quotation],
        plan: MilestonePlan,
    ) -> BulkPricingInput<'a> {
        BulkPricingInput {
            currency: Currency::Usd,
            items,
            quotations,
            tax_percentage: dec!(10),
            shipping_fee: dec!(50),
            plan,
            payment_types: MilestonePaymentTypes::default(),
            commercial_invoice: None,
            additional_items: &[],
            deposit: Decimal::ZERO,
            sample_deduction: Decimal::ZERO,
        }
    }

    #[test]
    fn sample_bank_transfer_has_no_fee() {
        let items = test_items();
        let quotations = test_quotations();
        let snapshot = PricingEngine::new()
            .price_sample(&SamplePricingInput {
                currency: Currency::Usd,
                items: &items,
                quotations: &quotations,
                tax_percentage: dec!(10),
                shipping_fee: dec!(25),
                payment_type: PaymentType::BankTransfer,
            })
            .unwrap();

        // 10 * 12.50 + 5 * 20 (quoted)
        assert_eq!(snapshot.sub_total, dec!(225));
        assert_eq!(snapshot.items[1].unit_price, dec!(20));
        assert_eq!(snapshot.tax, dec!(25));
        assert_eq!(snapshot.transaction_fee, Decimal::ZERO);
        assert_eq!(snapshot.total, dec!(275));
    }

    #[test]
    fn sample_card_fee_covers_shipping() {
        let items = test_items();
        let quotations = test_quotations();
        let snapshot = PricingEngine::new()
            .price_sample(&SamplePricingInput {
                currency: Currency::Usd,
                items: &items,
                quotations: &quotations,
                tax_percentage: Decimal::ZERO,
                shipping_fee: dec!(25),
                payment_type: PaymentType::Card,
            })
            .unwrap();

        // (225 + 25) * 4% + 0.30
        assert_eq!(snapshot.transaction_fee, dec!(10.30));
        assert_eq!(snapshot.total, dec!(260.30));
    }

    #[test]
    fn unpriced_line_without_quotation_is_rejected() {
        let items = test_items();
        let err = PricingEngine::new()
            .resolve_items(&items, &[], QuotationKind::Sample)
            .unwrap_err();
        assert_eq!(err, DomainError::Pricing(InvalidPricingInput::MissingQuotation("sample")));
    }

    #[test]
    fn non_positive_quantity_is_rejected() {
        let items = vec![CartItem::new("S", "blue", 0, dec!(5))];
        match PricingEngine::new().resolve_items(&items, &[], QuotationKind::Bulk) {
            Err(DomainError::Pricing(InvalidPricingInput::NonPositiveQuantity { line: 0 })) => {}
            other => panic!("Expected NonPositiveQuantity, got {other:?}"),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        match PricingEngine::new().resolve_items(&[], &test_quotations(), QuotationKind::Bulk) {
            Err(DomainError::Pricing(InvalidPricingInput::EmptyCart)) => {}
            other => panic!("Expected EmptyCart, got {other:?}"),
        }
    }

    #[test]
    fn bulk_split_puts_shipping_on_final() {
        let items = test_items();
        let quotations = test_quotations();
        let plan = MilestonePlan::new(30, 0).unwrap();
        let pricing = PricingEngine::new()
            .price_bulk(&bulk_input(&items, &quotations, plan))
            .unwrap();

        // 10 * 12.50 + 5 * 8 (bulk quote)
        assert_eq!(pricing.sub_total, dec!(165));
        assert_eq!(pricing.first.sub_total, dec!(49.50));
        assert_eq!(pricing.first.tax, dec!(4.95));
        assert_eq!(pricing.final_.sub_total, dec!(115.50));
        assert_eq!(pricing.final_.shipping_fee, dec!(50));
        assert_eq!(pricing.tax, dec!(21.50));
        assert_eq!(pricing.final_.tax, dec!(16.55));
        assert_eq!(pricing.total, pricing.first.total + pricing.final_.total);
        assert_eq!(pricing.total, dec!(236.50));
    }

    #[test]
    fn zero_first_percentage_leaves_first_milestone_empty() {
        let items = test_items();
        let quotations = test_quotations();
        let mut input = bulk_input(&items, &quotations, MilestonePlan::new(0, 0).unwrap());
        input.payment_types.first = PaymentType::Card;
        let pricing = PricingEngine::new().price_bulk(&input).unwrap();

        assert_eq!(pricing.first.total, Decimal::ZERO);
        assert_eq!(pricing.first.transaction_fee, Decimal::ZERO);
        assert_eq!(pricing.final_.percentage, 100);
    }

    #[test]
    fn commercial_invoice_overrides_quoted_terms() {
        let items = test_items();
        let quotations = test_quotations();
        let invoice = CommercialInvoice {
            sub_total: dec!(150),
            tax_percentage: dec!(5),
            shipping_fee: dec!(20),
            attachments: vec![],
        };
        let additional = vec![AdditionalItem {
            description: "labels".into(),
            qty: 100,
            unit_price: dec!(0.10),
            total_price: Decimal::ZERO,
        }];
        let mut input = bulk_input(&items, &quotations, MilestonePlan::new(30, 0).unwrap());
        input.commercial_invoice = Some(&invoice);
        input.additional_items = &additional;
        input.deposit = dec!(10);
        input.sample_deduction = dec!(25);
        let pricing = PricingEngine::new().price_bulk(&input).unwrap();

        assert_eq!(pricing.sub_total, dec!(175));
        assert_eq!(pricing.sub_total_after_deduction, dec!(160));
        assert_eq!(pricing.shipping_fee, dec!(20));
        assert_eq!(pricing.tax, dec!(9));
        assert_eq!(pricing.final_.deduction, dec!(25));
        assert_eq!(
            pricing.total,
            pricing.first.total + pricing.second.total + pricing.final_.total + pricing.deposit
        );
    }

    #[test]
    fn deposit_beyond_final_remainder_is_rejected() {
        let items = test_items();
        let quotations = test_quotations();
        let mut input = bulk_input(&items, &quotations, MilestonePlan::new(30, 0).unwrap());
        input.deposit = dec!(5000);
        match PricingEngine::new().price_bulk(&input) {
            Err(DomainError::Pricing(InvalidPricingInput::CreditsExceedFinal { credits, remaining })) => {
                assert_eq!(credits, dec!(5000));
                // 165 - 49.50 taken by the first payment
                assert_eq!(remaining, dec!(115.50));
            }
            other => panic!("Expected CreditsExceedFinal, got {other:?}"),
        }

        input.deposit = dec!(115.50);
        let pricing = PricingEngine::new().price_bulk(&input).unwrap();
        assert_eq!(pricing.final_.sub_total, Decimal::ZERO);
        assert_eq!(pricing.final_.total, dec!(50) + pricing.final_.tax);
    }

    #[test]
    fn sample_deduction_cannot_push_final_below_zero() {
        let items = test_items();
        let quotations = test_quotations();
        let mut input = bulk_input(&items, &quotations, MilestonePlan::new(30, 0).unwrap());
        input.deposit = dec!(100);
        input.sample_deduction = dec!(100);
        match PricingEngine::new().price_bulk(&input) {
            Err(DomainError::Pricing(InvalidPricingInput::CreditsExceedFinal { credits, .. })) => {
                assert_eq!(credits, dec!(200));
            }
            other => panic!("Expected CreditsExceedFinal, got {other:?}"),
        }
    }

    #[test]
    fn pricing_is_idempotent() {
        let items = test_items();
        let quotations = test_quotations();
        let engine = PricingEngine::new();
        let input = bulk_input(&items, &quotations, MilestonePlan::new(40, 20).unwrap());
        let a = engine.price_bulk(&input).unwrap();
        let b = engine.price_bulk(&repriced_input(&a, &quotations)).unwrap();
        assert_eq!(a, b);
    }

    fn repriced_input<'a>(pricing: &'a BulkPricing, quotations: &'a [Quotation]) -> BulkPricingInput<'a> {
        bulk_input(&pricing.items, quotations, pricing.plan)
    }

    fn cents(n: i64) -> Decimal {
        Decimal::new(n, 2)
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn milestones_sum_to_total(
            lines in prop::collection::vec((1i64..500, 1i64..1_000_000), 1..8),
            tax in 0u32..25,
            shipping in 0i64..100_000,
            first in 0u32..=100,
            second_share in 0u32..=100,
            deposit in 0i64..10_000,
            deduction in 0i64..10_000,
            first_card in any::<bool>(),
            final_card in any::<bool>(),
        ) {
            let second = second_share.min(100 - first);
            let items: Vec<CartItem> = lines
                .iter()
                .map(|(qty, price)| CartItem::new("M", "black", *qty, cents(*price)))
                .collect();
            let mut payment_types = MilestonePaymentTypes::default();
            if first_card { payment_types.first = PaymentType::Card; }
            if final_card { payment_types.final_ = PaymentType::Card; }

            let input = BulkPricingInput {
                currency: Currency::Usd,
                items: &items,
                quotations: &[],
                tax_percentage: Decimal::from(tax),
                shipping_fee: cents(shipping),
                plan: MilestonePlan::new(first, second).unwrap(),
                payment_types,
                commercial_invoice: None,
                additional_items: &[],
                deposit: cents(deposit),
                sample_deduction: cents(deduction),
            };
            let p = match PricingEngine::new().price_bulk(&input) {
                Ok(p) => p,
                Err(DomainError::Pricing(InvalidPricingInput::CreditsExceedFinal { credits, remaining })) => {
                    prop_assert!(credits > remaining);
                    return Ok(());
                }
                Err(other) => return Err(TestCaseError::fail(format!("unexpected error: {other}"))),
            };

            prop_assert!(p.final_.sub_total >= Decimal::ZERO);
            prop_assert!(p.final_.total >= Decimal::ZERO);
            prop_assert_eq!(p.first.total + p.second.total + p.final_.total + p.deposit, p.total);
            prop_assert_eq!(p.first.tax + p.second.tax + p.final_.tax, p.tax);
            prop_assert_eq!(
                p.first.sub_total + p.second.sub_total + p.final_.sub_total + p.deposit,
                p.sub_total_after_deduction
            );
            prop_assert_eq!(
                p.total,
                p.sub_total_after_deduction + p.shipping_fee + p.tax + p.transaction_fee - p.sample_deduction
            );
            prop_assert_eq!(p.first.percentage + p.second.percentage + p.final_.percentage, 100);
        }
    }
}
