pub mod pool;
pub mod position;

// Re-export for easier access
pub use pool::{PoolSnapshot, TokenBalances};
pub use position::{NO_POSITION, PositionId, PositionRecord, RangePosition};
