/// Concentrated liquidity amount and liquidity math.
pub mod concentrated_liquidity;
/// Tick and price conversions.
pub mod price_tick;
/// Range selection around the current tick.
pub mod tick_range;
