use crate::error::DomainError;
use crate::value_objects::percentage::Percentage;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;

fn ordered(sqrt_price_a: Decimal, sqrt_price_b: Decimal) -> (Decimal, Decimal) {
    if sqrt_price_a < sqrt_price_b {
        (sqrt_price_a, sqrt_price_b)
    } else {
        (sqrt_price_b, sqrt_price_a)
    }
}

fn to_decimal(value: u128, what: &'static str) -> Result<Decimal, DomainError> {
    Decimal::from_u128(value).ok_or(DomainError::Overflow(what))
}

fn div(num: Decimal, den: Decimal, what: &'static str) -> Result<Decimal, DomainError> {
    num.checked_div(den).ok_or(DomainError::Overflow(what))
}

fn to_u128(value: Decimal, what: &'static str) -> Result<u128, DomainError> {
    value.floor().to_u128().ok_or(DomainError::Overflow(what))
}

/// Calculates the amount of token0 (x) given liquidity and price range.
/// delta_x = L * (1/sqrt(P_a) - 1/sqrt(P_b))
/// where P_a < P_b
pub fn get_amount0_delta(
    liquidity: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> Result<u128, DomainError> {
    if sqrt_price_a <= Decimal::ZERO || sqrt_price_b <= Decimal::ZERO {
        return Err(DomainError::NonPositivePrice);
    }
    let (lower, upper) = ordered(sqrt_price_a, sqrt_price_b);

    // delta_x = L * ( (upper - lower) / (lower * upper) )
    let liquidity = to_decimal(liquidity, "liquidity")?;
    let den = lower
        .checked_mul(upper)
        .ok_or(DomainError::Overflow("sqrt price product"))?;
    let factor = div(upper - lower, den, "amount0 factor")?;
    let amount = liquidity
        .checked_mul(factor)
        .ok_or(DomainError::Overflow("amount0"))?;

    to_u128(amount, "amount0")
}

/// Calculates the amount of token1 (y) given liquidity and price range.
/// delta_y = L * (sqrt(P_b) - sqrt(P_a))
/// where P_a < P_b
pub fn get_amount1_delta(
    liquidity: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> Result<u128, DomainError> {
    let (lower, upper) = ordered(sqrt_price_a, sqrt_price_b);
    let liquidity = to_decimal(liquidity, "liquidity")?;
    let amount = liquidity
        .checked_mul(upper - lower)
        .ok_or(DomainError::Overflow("amount1"))?;

    to_u128(amount, "amount1")
}

/// Calculates liquidity for a given amount of token0 and price range
/// L = amount0 * (sqrt(P_a) * sqrt(P_b)) / (sqrt(P_b) - sqrt(P_a))
pub fn get_liquidity_for_amount0(
    amount0: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> Result<u128, DomainError> {
    let (lower, upper) = ordered(sqrt_price_a, sqrt_price_b);
    let den = upper - lower;
    if den.is_zero() {
        return Err(DomainError::EmptyRange);
    }

    let amount0 = to_decimal(amount0, "amount0")?;
    let num = amount0
        .checked_mul(lower)
        .and_then(|v| v.checked_mul(upper))
        .ok_or(DomainError::Overflow("liquidity0"))?;

    to_u128(div(num, den, "liquidity0")?, "liquidity0")
}

/// Calculates liquidity for a given amount of token1 and price range
/// L = amount1 / (sqrt(P_b) - sqrt(P_a))
pub fn get_liquidity_for_amount1(
    amount1: u128,
    sqrt_price_a: Decimal,
    sqrt_price_b: Decimal,
) -> Result<u128, DomainError> {
    let (lower, upper) = ordered(sqrt_price_a, sqrt_price_b);
    let den = upper - lower;
    if den.is_zero() {
        return Err(DomainError::EmptyRange);
    }

    let amount1 = to_decimal(amount1, "amount1")?;
    to_u128(div(amount1, den, "liquidity1")?, "liquidity1")
}

/// Largest liquidity that both balances can fund on `[sqrt_lower, sqrt_upper]`
/// at the current square root price.
pub fn max_liquidity_for_amounts(
    sqrt_price: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
    amount0: u128,
    amount1: u128,
) -> Result<u128, DomainError> {
    let (lower, upper) = ordered(sqrt_lower, sqrt_upper);

    if sqrt_price <= lower {
        get_liquidity_for_amount0(amount0, lower, upper)
    } else if sqrt_price < upper {
        let from0 = get_liquidity_for_amount0(amount0, sqrt_price, upper);
        let from1 = get_liquidity_for_amount1(amount1, lower, sqrt_price);
        match (from0, from1) {
            (Ok(l0), Ok(l1)) => Ok(l0.min(l1)),
            // A side whose window is too thin to represent does not bind.
            (Ok(l), Err(DomainError::Overflow(_))) | (Err(DomainError::Overflow(_)), Ok(l)) => {
                Ok(l)
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    } else {
        get_liquidity_for_amount1(amount1, lower, upper)
    }
}

/// Token amounts represented by `liquidity` on `[sqrt_lower, sqrt_upper]` at
/// the current square root price.
pub fn amounts_for_liquidity(
    sqrt_price: Decimal,
    sqrt_lower: Decimal,
    sqrt_upper: Decimal,
    liquidity: u128,
) -> Result<(u128, u128), DomainError> {
    let (lower, upper) = ordered(sqrt_lower, sqrt_upper);

    if sqrt_price <= lower {
        Ok((get_amount0_delta(liquidity, lower, upper)?, 0))
    } else if sqrt_price < upper {
        Ok((
            get_amount0_delta(liquidity, sqrt_price, upper)?,
            get_amount1_delta(liquidity, lower, sqrt_price)?,
        ))
    } else {
        Ok((0, get_amount1_delta(liquidity, lower, upper)?))
    }
}

/// Estimates swap output assuming the trade stays inside the active tick.
///
/// The fee is taken from the input. Large trades that cross initialized ticks
/// are overestimated, which the caller's slippage bound absorbs.
pub fn estimate_swap_output(
    liquidity: u128,
    sqrt_price: Decimal,
    amount_in: u64,
    a_to_b: bool,
    fee_rate: Percentage,
) -> Result<u64, DomainError> {
    if liquidity == 0 {
        return Err(DomainError::ZeroLiquidity);
    }
    if sqrt_price <= Decimal::ZERO {
        return Err(DomainError::NonPositivePrice);
    }
    if amount_in == 0 {
        return Ok(0);
    }

    let l = to_decimal(liquidity, "liquidity")?;
    let amount = Decimal::from(amount_in) * fee_rate.complement();

    let out = if a_to_b {
        // sqrt_p' = L * sqrt_p / (L + dx * sqrt_p); dy = L * (sqrt_p - sqrt_p')
        let den = amount
            .checked_mul(sqrt_price)
            .and_then(|v| v.checked_add(l))
            .ok_or(DomainError::Overflow("swap denominator"))?;
        let num = l
            .checked_mul(sqrt_price)
            .ok_or(DomainError::Overflow("swap numerator"))?;
        let next = div(num, den, "swap price")?;
        l.checked_mul(sqrt_price - next)
            .ok_or(DomainError::Overflow("swap output"))?
    } else {
        // sqrt_p' = sqrt_p + dy / L; dx = L * (sqrt_p' - sqrt_p) / (sqrt_p * sqrt_p')
        let next = div(amount, l, "swap price")?
            .checked_add(sqrt_price)
            .ok_or(DomainError::Overflow("swap price"))?;
        let den = sqrt_price
            .checked_mul(next)
            .ok_or(DomainError::Overflow("swap denominator"))?;
        let num = l
            .checked_mul(next - sqrt_price)
            .ok_or(DomainError::Overflow("swap output"))?;
        div(num, den, "swap output")?
    };

    out.floor()
        .to_u64()
        .ok_or(DomainError::Overflow("swap output"))
}
