//! Currency-specific card transaction fees.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use inflow_core::{Currency, round_money};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Proportional card fee (0.04 = 4%).
    pub rate: Decimal,
    /// Fixed fee added per charge, in major units.
    pub additional_fee: Decimal,
}

impl FeeSchedule {
    pub fn for_currency(currency: Currency) -> Self {
        match currency {
            Currency::Usd => Self {
                rate: dec!(0.04),
                additional_fee: dec!(0.30),
            },
            Currency::Vnd => Self {
                rate: dec!(0.04),
                additional_fee: Decimal::ZERO,
            },
        }
    }

    pub fn fee_on(&self, base: Decimal) -> Decimal {
        round_money(base * self.rate + self.additional_fee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usd_charges_rate_plus_fixed_fee() {
        let fees = FeeSchedule::for_currency(Currency::Usd);
        assert_eq!(fees.fee_on(dec!(100)), dec!(4.30));
    }

    #[test]
    fn vnd_has_no_fixed_fee() {
        let fees = FeeSchedule::for_currency(Currency::Vnd);
        assert_eq!(fees.fee_on(dec!(1000000)), dec!(40000));
    }
}
