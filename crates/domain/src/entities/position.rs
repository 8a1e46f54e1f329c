use crate::error::DomainError;
use crate::math::tick_range::TickRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Literal used on disk for "no tracked position".
pub const NO_POSITION: &str = "none";

/// Identifier of a position token on the ledger.
///
/// On Whirlpools this is the base58 address of the position mint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(String);

impl PositionId {
    /// Wraps a ledger identifier. Empty strings and the `"none"` sentinel are rejected.
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NO_POSITION) {
            return Err(DomainError::InvalidPositionId(id));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PositionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Durable record of the single tracked position.
///
/// This is an advisory cache of what the keeper last believes it completed;
/// the ledger remains the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRecord {
    #[serde(with = "position_id_or_none")]
    pub position_id: Option<PositionId>,
    /// Unix time in milliseconds of the last save.
    pub last_checked_at: u64,
}

impl PositionRecord {
    pub fn new(position_id: Option<PositionId>, last_checked_at: u64) -> Self {
        Self {
            position_id,
            last_checked_at,
        }
    }
}

mod position_id_or_none {
    use super::{NO_POSITION, PositionId};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(id: &Option<PositionId>, s: S) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => s.serialize_str(id.as_str()),
            None => s.serialize_str(NO_POSITION),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PositionId>, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(PositionId::new(raw).ok())
    }
}

/// Position details as read from the ledger for one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePosition {
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub owed_amount_a: u64,
    pub owed_amount_b: u64,
}

impl RangePosition {
    pub fn range(&self) -> TickRange {
        TickRange::new(self.tick_lower, self.tick_upper)
    }

    /// A position earns fees while `tick_lower <= tick < tick_upper`.
    pub fn is_in_range(&self, tick: i32) -> bool {
        self.range().contains(tick)
    }
}
