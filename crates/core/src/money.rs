//! Currency and monetary rounding.
//!
//! Amounts are `rust_decimal::Decimal` values in major units, rounded to two
//! places half-away-from-zero after every arithmetic step.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainResult, InvalidPricingInput};
use crate::value_object::ValueObject;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Vnd,
}

impl Currency {
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Vnd => "VND",
        }
    }

    /// Multiplier from major units to the gateway's integer unit.
    pub fn smallest_unit_factor(self) -> i64 {
        match self {
            Currency::Usd => 100,
            Currency::Vnd => 1,
        }
    }

    /// Converts a major-unit amount to the gateway's integer amount (truncating).
    pub fn to_smallest_unit(self, amount: Decimal) -> DomainResult<i64> {
        (amount * Decimal::from(self.smallest_unit_factor()))
            .trunc()
            .to_i64()
            .ok_or_else(|| InvalidPricingInput::Overflow.into())
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl core::str::FromStr for Currency {
    type Err = crate::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "VND" => Ok(Currency::Vnd),
            other => Err(crate::DomainError::validation(format!("unsupported currency: {other}"))),
        }
    }
}

impl ValueObject for Currency {}

pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
