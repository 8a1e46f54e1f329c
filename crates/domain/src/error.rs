use thiserror::Error;

/// Errors produced by domain validation and math.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("tick spacing must be positive, got {0}")]
    InvalidTickSpacing(i32),
    #[error("range half width must be non-negative, got {0}")]
    InvalidRangeWidth(i32),
    #[error("usable tick window [{min}, {max}] is narrower than one spacing ({spacing})")]
    RangeTooNarrow { min: i32, max: i32, spacing: i32 },
    #[error("price must be positive")]
    NonPositivePrice,
    #[error("arithmetic overflow: {0}")]
    Overflow(&'static str),
    #[error("range has zero width")]
    EmptyRange,
    #[error("pool has no active liquidity")]
    ZeroLiquidity,
    #[error("invalid position identifier: {0:?}")]
    InvalidPositionId(String),
}
