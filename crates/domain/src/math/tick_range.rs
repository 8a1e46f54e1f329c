//! Range selection around the current tick.
//!
//! A new position is opened on a symmetric window around the observed tick.
//! Bounds are snapped to the pool's tick spacing and kept inside the global
//! tick limits of the protocol, so the result can always be submitted.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest tick index supported by Whirlpools.
pub const MIN_TICK_INDEX: i32 = -443_636;
/// Highest tick index supported by Whirlpools.
pub const MAX_TICK_INDEX: i32 = 443_636;

/// Global tick limits of a protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickLimits {
    pub min: i32,
    pub max: i32,
}

impl TickLimits {
    pub fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// The outermost spacing multiples that still lie inside the limits.
    pub fn usable(&self, spacing: i32) -> Result<(i32, i32), DomainError> {
        check_spacing(spacing)?;
        let min = self.min.div_euclid(spacing) * spacing;
        let min = if min < self.min { min + spacing } else { min };
        let max = self.max.div_euclid(spacing) * spacing;
        if max - min < spacing {
            return Err(DomainError::RangeTooNarrow {
                min,
                max,
                spacing,
            });
        }
        Ok((min, max))
    }
}

impl Default for TickLimits {
    fn default() -> Self {
        Self::new(MIN_TICK_INDEX, MAX_TICK_INDEX)
    }
}

/// A half-open tick window `[lower, upper)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TickRange {
    pub lower: i32,
    pub upper: i32,
}

impl TickRange {
    pub fn new(lower: i32, upper: i32) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, tick: i32) -> bool {
        tick >= self.lower && tick < self.upper
    }
}

impl fmt::Display for TickRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

fn check_spacing(spacing: i32) -> Result<(), DomainError> {
    if spacing <= 0 {
        return Err(DomainError::InvalidTickSpacing(spacing));
    }
    Ok(())
}

/// Rounds a tick to the nearest multiple of `spacing`. Ties round up.
pub fn round_to_spacing(tick: i32, spacing: i32) -> i32 {
    let quotient = tick.div_euclid(spacing);
    let remainder = tick.rem_euclid(spacing);
    let rounded = if i64::from(remainder) * 2 >= i64::from(spacing) {
        i64::from(quotient) + 1
    } else {
        i64::from(quotient)
    };
    (rounded * i64::from(spacing)).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Computes a symmetric window of `half_width` ticks around `current_tick`.
///
/// Each side is rounded to the nearest spacing multiple. A window collapsed by
/// rounding is widened upward by one spacing, then the result goes through
/// [`clamp_and_normalize`].
pub fn compute_range(
    current_tick: i32,
    tick_spacing: i32,
    half_width: i32,
    limits: TickLimits,
) -> Result<TickRange, DomainError> {
    check_spacing(tick_spacing)?;
    if half_width < 0 {
        return Err(DomainError::InvalidRangeWidth(half_width));
    }

    let lower = round_to_spacing(current_tick.saturating_sub(half_width), tick_spacing);
    let mut upper = round_to_spacing(current_tick.saturating_add(half_width), tick_spacing);
    if lower == upper {
        upper = upper.saturating_add(tick_spacing);
    }

    clamp_and_normalize(TickRange::new(lower, upper), tick_spacing, limits)
}

/// Snaps, orders and clamps a range so it can be submitted.
///
/// The result satisfies `usable_min <= lower < upper <= usable_max` with both
/// bounds on spacing multiples. Applying it to its own output is a no-op.
pub fn clamp_and_normalize(
    range: TickRange,
    tick_spacing: i32,
    limits: TickLimits,
) -> Result<TickRange, DomainError> {
    let (min, max) = limits.usable(tick_spacing)?;

    let mut lower = round_to_spacing(range.lower, tick_spacing);
    let mut upper = round_to_spacing(range.upper, tick_spacing);
    if lower > upper {
        std::mem::swap(&mut lower, &mut upper);
    }

    lower = lower.clamp(min, max);
    upper = upper.clamp(min, max);

    if lower >= upper {
        if upper - tick_spacing >= min {
            lower = upper - tick_spacing;
        } else {
            lower = min;
            upper = min + tick_spacing;
        }
    }

    Ok(TickRange::new(lower, upper))
}
