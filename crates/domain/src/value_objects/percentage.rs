use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// A fraction expressed as a decimal (0.005 = 0.5%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Percentage(pub Decimal);

impl Percentage {
    pub fn from_bps(bps: u32) -> Self {
        Self(Decimal::from(bps) / Decimal::from(10000))
    }

    /// `1 - self`, floored at zero.
    pub fn complement(&self) -> Decimal {
        (Decimal::ONE - self.0).max(Decimal::ZERO)
    }

    /// Deducts this tolerance from a raw amount, rounding down.
    pub fn deduct_from(&self, amount: u64) -> u64 {
        (Decimal::from(amount) * self.complement())
            .floor()
            .to_u64()
            .unwrap_or(0)
    }

    /// Adds this tolerance to a raw amount, rounding up and saturating.
    pub fn add_to(&self, amount: u64) -> u64 {
        (Decimal::from(amount) * (Decimal::ONE + self.0))
            .ceil()
            .to_u64()
            .unwrap_or(u64::MAX)
    }
}

impl Default for Percentage {
    fn default() -> Self {
        Self(Decimal::ZERO)
    }
}
