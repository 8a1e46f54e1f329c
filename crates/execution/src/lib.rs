//! Keeper engine for a single concentrated liquidity position.
//!
//! This crate provides:
//! - A retry and timeout harness around every ledger call
//! - A durable record of the tracked position
//! - Orphan recovery from the ledger
//! - The four-phase rebalance protocol
//! - The position state machine with a single-flight trigger guard
//! - A safe-mode circuit breaker driven by an external hedge service
//! - A reconnecting trigger listener

/// Prelude module for convenient imports.
pub mod prelude;

/// Operator notifications.
pub mod alerts;
/// Shared keeper dependencies.
pub mod context;
/// Safe-mode circuit breaker.
pub mod emergency;
/// Error taxonomy.
pub mod error;
/// External hedge service.
pub mod hedge;
/// Retry and timeout harness.
pub mod retry;
/// Position state machine and trigger handling.
pub mod scheduler;
/// Durable position record.
pub mod state;
/// Strategy execution.
pub mod strategy;
/// State synchronization.
pub mod sync;

#[cfg(test)]
mod testing;
