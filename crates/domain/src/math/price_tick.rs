use crate::error::DomainError;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

const TICK_BASE: f64 = 1.0001;
const Q64: f64 = 18_446_744_073_709_551_616.0;

/// Returns the square root of the raw price at a tick.
/// sqrt(P) = 1.0001 ^ (tick / 2)
pub fn tick_to_sqrt_price(tick: i32) -> Result<Decimal, DomainError> {
    let sqrt_f64 = TICK_BASE.powf(f64::from(tick) / 2.0);
    Decimal::from_f64(sqrt_f64).ok_or(DomainError::Overflow("tick sqrt price"))
}

/// Converts a Q64.64 fixed point square root price into a decimal.
pub fn sqrt_price_from_x64(sqrt_price_x64: u128) -> Result<Decimal, DomainError> {
    let sqrt_f64 = sqrt_price_x64 as f64 / Q64;
    Decimal::from_f64(sqrt_f64).ok_or(DomainError::Overflow("sqrt price"))
}

/// Converts a raw square root price into a UI price of token A in token B.
pub fn ui_price_from_sqrt(
    sqrt_price: Decimal,
    decimals_a: u8,
    decimals_b: u8,
) -> Result<Decimal, DomainError> {
    let raw = sqrt_price
        .checked_mul(sqrt_price)
        .ok_or(DomainError::Overflow("raw price"))?;
    let shift = i32::from(decimals_a) - i32::from(decimals_b);
    let factor = Decimal::from(10u64.pow(shift.unsigned_abs()));
    if shift >= 0 {
        raw.checked_mul(factor).ok_or(DomainError::Overflow("ui price"))
    } else {
        raw.checked_div(factor).ok_or(DomainError::Overflow("ui price"))
    }
}
