//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use clmm_keeper_execution::prelude::*;
//! ```

// Alerts
pub use crate::alerts::{
    AlertError, ConsoleNotifier, MultiNotifier, Notifier, WebhookNotifier, notify_best_effort,
};

// Context
pub use crate::context::KeeperContext;

// Emergency
pub use crate::emergency::{HealthVerdict, SafeModeBreaker, SafeModeStats};

// Errors
pub use crate::error::{ErrorKind, KeeperError};

// Hedge
pub use crate::hedge::{
    DisabledHedge, HedgeError, HedgeService, HttpHedgeService, position_exposure,
};

// Retry
pub use crate::retry::{Harness, RetryPolicy, with_retry, with_retry_if, with_timeout};

// Scheduler
pub use crate::scheduler::{
    EvaluationOutcome, FlightGuard, IntervalTrigger, Keeper, KeeperConfig, ModeCell, SingleFlight,
    TriggerOutcome,
};

// State
pub use crate::state::{DEFAULT_STATE_FILE, StateError, StateStore};

// Strategy
pub use crate::strategy::{RebalanceConfig, RebalanceEngine, RebalanceOutcome, RebalancePhase};

// Sync
pub use crate::sync::{
    ListenerStats, ReconcileOutcome, Reconciler, TriggerListener, TriggerListenerConfig,
};
