use crate::value_objects::percentage::Percentage;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

/// Pool state read from the ledger for one evaluation.
///
/// Snapshots are never cached: a snapshot taken after a swap supersedes any
/// snapshot taken before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Price of token A in token B, decimal adjusted.
    pub current_price: Decimal,
    pub current_tick: i32,
    pub total_liquidity: u128,
    pub tick_spacing: i32,
    /// Square root of the raw (not decimal adjusted) price.
    pub sqrt_price: Decimal,
    pub decimals_a: u8,
    pub decimals_b: u8,
    pub fee_rate: Percentage,
}

impl PoolSnapshot {
    /// Converts a raw token A amount into UI units.
    pub fn ui_amount_a(&self, raw: u64) -> Decimal {
        Decimal::from(raw) / pow10(self.decimals_a)
    }

    /// Converts a raw token B amount into UI units.
    pub fn ui_amount_b(&self, raw: u64) -> Decimal {
        Decimal::from(raw) / pow10(self.decimals_b)
    }

    /// Converts a UI token A amount into raw units, truncating dust.
    pub fn raw_amount_a(&self, ui: Decimal) -> u64 {
        (ui * pow10(self.decimals_a)).trunc().to_u64().unwrap_or(0)
    }

    /// Converts a UI token B amount into raw units, truncating dust.
    pub fn raw_amount_b(&self, ui: Decimal) -> u64 {
        (ui * pow10(self.decimals_b)).trunc().to_u64().unwrap_or(0)
    }

    /// Values both balances in token B units at the snapshot price.
    pub fn value_in_b(&self, balances: &TokenBalances) -> (Decimal, Decimal) {
        let value_a = self.ui_amount_a(balances.amount_a) * self.current_price;
        let value_b = self.ui_amount_b(balances.amount_b);
        (value_a, value_b)
    }
}

fn pow10(decimals: u8) -> Decimal {
    Decimal::from(10u64.pow(u32::from(decimals)))
}

/// Raw wallet balances of the two pool tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalances {
    pub amount_a: u64,
    pub amount_b: u64,
}

impl TokenBalances {
    pub fn new(amount_a: u64, amount_b: u64) -> Self {
        Self { amount_a, amount_b }
    }

    pub fn is_empty(&self) -> bool {
        self.amount_a == 0 && self.amount_b == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn snapshot() -> PoolSnapshot {
        PoolSnapshot {
            current_price: dec!(100),
            current_tick: 0,
            total_liquidity: 1_000_000,
            tick_spacing: 64,
            sqrt_price: dec!(0.316227766),
            decimals_a: 9,
            decimals_b: 6,
            fee_rate: Percentage::from_bps(30),
        }
    }

    #[test]
    fn test_value_in_b() {
        let pool = snapshot();
        let balances = TokenBalances::new(515_000_000, 48_500_000);
        let (value_a, value_b) = pool.value_in_b(&balances);
        assert_eq!(value_a, dec!(51.5));
        assert_eq!(value_b, dec!(48.5));
    }

    #[test]
    fn test_raw_round_trip_truncates() {
        let pool = snapshot();
        assert_eq!(pool.raw_amount_a(dec!(0.0150000009)), 15_000_000);
        assert_eq!(pool.raw_amount_b(dec!(1.5)), 1_500_000);
    }
}
