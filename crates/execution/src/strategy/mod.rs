//! Strategy execution.

mod rebalance;

pub use rebalance::*;
