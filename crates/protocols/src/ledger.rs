//! Ledger ports.
//!
//! Reads are side-effect free and safe to retry. Writes return a
//! [`PendingSubmission`] as soon as the transaction has been handed to the
//! network; settlement is observed separately with
//! [`LedgerWriter::await_settlement`].

use async_trait::async_trait;
use clmm_keeper_domain::DomainError;
use clmm_keeper_domain::entities::{PoolSnapshot, PositionId, RangePosition, TokenBalances};
use clmm_keeper_domain::math::tick_range::TickRange;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors raised at the ledger boundary.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    /// Transport or node failure. The outcome of a write is unknown.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// The transaction was never accepted by the network and can be rebuilt.
    #[error("not submitted: {0}")]
    NotSubmitted(String),
    /// The transaction landed and failed.
    #[error("transaction {signature} failed: {reason}")]
    Rejected { signature: String, reason: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl LedgerError {
    /// Failures that may succeed when the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::NotSubmitted(_))
    }

    /// Failures that prove nothing reached the ledger.
    pub fn is_not_submitted(&self) -> bool {
        matches!(self, Self::NotSubmitted(_))
    }
}

/// Full withdrawal of a position: withdraw, collect, burn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPlan {
    pub position: PositionId,
    /// Liquidity to withdraw. Zero skips the withdrawal step.
    pub liquidity: u128,
    pub min_amount_a: u64,
    pub min_amount_b: u64,
}

/// A single exact-input swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOrder {
    /// `true` sells token A for token B.
    pub a_to_b: bool,
    pub amount_in: u64,
    pub min_amount_out: u64,
}

/// A new position funded from the wallet.
///
/// The maxima are the binding slippage bound on Whirlpools, which cap
/// deposits only. The minima are reported for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintOrder {
    pub range: TickRange,
    pub liquidity: u128,
    pub amount_a_max: u64,
    pub amount_b_max: u64,
    pub amount_a_min: u64,
    pub amount_b_min: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    Exit,
    Withdraw,
    Collect,
    Burn,
    Swap,
    Mint,
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Exit => "exit",
            Self::Withdraw => "withdraw",
            Self::Collect => "collect",
            Self::Burn => "burn",
            Self::Swap => "swap",
            Self::Mint => "mint",
        };
        f.write_str(label)
    }
}

/// Handle to a submitted, not yet settled, write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub kind: SubmissionKind,
    /// Transaction signature or equivalent handle.
    pub handle: String,
    /// Position the write acts on, when known at submission time.
    pub subject: Option<PositionId>,
}

/// Events the ledger reports for a settled write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    PositionOpened { position: PositionId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub handle: String,
    pub events: Vec<LedgerEvent>,
}

/// Read side of the ledger.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn pool_snapshot(&self) -> Result<PoolSnapshot, LedgerError>;

    async fn position(&self, id: &PositionId) -> Result<RangePosition, LedgerError>;

    /// Position tokens owned by `owner`, in ledger enumeration order.
    async fn owned_positions(&self, owner: &str) -> Result<Vec<PositionId>, LedgerError>;

    async fn balances(&self) -> Result<TokenBalances, LedgerError>;

    /// Expected output of an exact-input swap at current pool state.
    async fn quote_swap(&self, a_to_b: bool, amount_in: u64) -> Result<u64, LedgerError>;
}

/// Write side of the ledger.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Whether [`LedgerWriter::submit_exit`] executes all exit steps atomically.
    fn supports_batched_exit(&self) -> bool;

    async fn submit_exit(&self, plan: &ExitPlan) -> Result<PendingSubmission, LedgerError>;

    async fn submit_withdraw(
        &self,
        position: &PositionId,
        liquidity: u128,
        min_amount_a: u64,
        min_amount_b: u64,
    ) -> Result<PendingSubmission, LedgerError>;

    async fn submit_collect(&self, position: &PositionId)
    -> Result<PendingSubmission, LedgerError>;

    async fn submit_burn(&self, position: &PositionId) -> Result<PendingSubmission, LedgerError>;

    async fn submit_swap(&self, order: &SwapOrder) -> Result<PendingSubmission, LedgerError>;

    async fn submit_mint(&self, order: &MintOrder) -> Result<PendingSubmission, LedgerError>;

    /// Waits until the submission is settled. Safe to call repeatedly.
    async fn await_settlement(
        &self,
        pending: &PendingSubmission,
    ) -> Result<SubmissionReceipt, LedgerError>;
}

/// A marker emitted by a trigger source. Markers increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Trigger {
    pub marker: u64,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.marker)
    }
}

/// A connection that delivers triggers until it drops.
#[async_trait]
pub trait TriggerFeed: Send + Sync {
    fn name(&self) -> &str;

    /// Connects, subscribes and forwards markers into `sink` until the
    /// connection ends. Returns the number of markers received.
    async fn run_session(&self, sink: &mpsc::Sender<Trigger>) -> Result<u64, LedgerError>;
}
