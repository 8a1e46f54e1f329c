//! State synchronization with the ledger.
//!
//! Provides:
//! - Orphan recovery of positions the local record lost track of
//! - A reconnecting trigger listener over the slot feed

mod reconciler;
mod trigger_listener;

pub use reconciler::*;
pub use trigger_listener::*;
