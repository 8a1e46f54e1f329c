//! Error taxonomy of the keeper.

use crate::alerts::AlertError;
use crate::hedge::HedgeError;
use crate::state::StateError;
use clmm_keeper_domain::DomainError;
use clmm_keeper_domain::entities::PositionId;
use clmm_keeper_protocols::prelude::{LedgerError, SubmissionKind};
use std::time::Duration;
use thiserror::Error;

/// Coarse classification used by the scheduler to report a failed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Retried by the next trigger from fresh state.
    Transient,
    /// Outcome of the operation is unknown.
    Timeout,
    /// The ledger reported something that cannot happen.
    ProtocolInvariantViolation,
    /// Health verdict was negative.
    RiskPanic,
}

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("hedge service error: {0}")]
    Hedge(#[from] HedgeError),

    #[error("alert delivery failed: {0}")]
    Alert(#[from] AlertError),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("math error: {0}")]
    Math(#[from] DomainError),

    #[error("{operation} did not complete within {limit:?}")]
    Timeout { operation: String, limit: Duration },

    #[error("protocol invariant violated: {0}")]
    ProtocolInvariantViolation(String),

    #[error("hedge service reports position {position} unhealthy")]
    RiskPanic { position: PositionId },

    #[error("exit of {position} stopped at {failed} after {completed:?}: {source}")]
    PartialExit {
        position: PositionId,
        completed: Vec<SubmissionKind>,
        failed: SubmissionKind,
        #[source]
        source: Box<KeeperError>,
    },

    #[error("nothing to deposit: balances {amount_a}/{amount_b} fund no liquidity")]
    NothingToDeposit { amount_a: u64, amount_b: u64 },
}

impl KeeperError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProtocolInvariantViolation(_) => ErrorKind::ProtocolInvariantViolation,
            Self::RiskPanic { .. } => ErrorKind::RiskPanic,
            Self::PartialExit { source, .. } => source.kind(),
            Self::Ledger(_)
            | Self::Hedge(_)
            | Self::Alert(_)
            | Self::State(_)
            | Self::Math(_)
            | Self::NothingToDeposit { .. } => ErrorKind::Transient,
        }
    }
}
