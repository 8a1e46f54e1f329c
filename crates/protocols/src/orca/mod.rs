//! Orca Whirlpool protocol adapter.
//!
//! This module provides functionality to interact with a single Whirlpool:
//! - Read pool, position and wallet state
//! - Build and submit LP instructions
//! - Observe settlement of submitted transactions

/// Instruction builders for on-chain operations.
pub mod executor;
/// Ledger port implementation.
pub mod ledger;
/// Whirlpool account structures.
pub mod whirlpool;
