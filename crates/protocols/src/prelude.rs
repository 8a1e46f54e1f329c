//! Prelude module for convenient imports.
//!
//! ```rust
//! use clmm_keeper_protocols::prelude::*;
//! ```

pub use crate::ledger::{
    ExitPlan, LedgerError, LedgerEvent, LedgerReader, LedgerWriter, MintOrder, PendingSubmission,
    SubmissionKind, SubmissionReceipt, SwapOrder, Trigger, TriggerFeed,
};
pub use crate::orca::ledger::{WhirlpoolLedger, WhirlpoolLedgerConfig};
pub use crate::rpc::{RpcConfig, RpcProvider, SlotFeed, read_keypair};
