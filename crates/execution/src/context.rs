//! Shared dependencies of the keeper components.

use crate::alerts::Notifier;
use crate::hedge::HedgeService;
use crate::retry::Harness;
use crate::state::StateStore;
use clmm_keeper_protocols::prelude::{LedgerReader, LedgerWriter};
use std::sync::Arc;

/// Everything an evaluation needs to talk to the outside world.
///
/// Built once at startup and shared behind an `Arc`.
#[derive(Clone)]
pub struct KeeperContext {
    pub reader: Arc<dyn LedgerReader>,
    pub writer: Arc<dyn LedgerWriter>,
    pub store: StateStore,
    pub notifier: Arc<dyn Notifier>,
    pub hedge: Arc<dyn HedgeService>,
    /// Ledger account whose positions the keeper manages.
    pub account: String,
    pub harness: Harness,
}
