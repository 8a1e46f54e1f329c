use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating mode of the keeper.
///
/// `SafeMode` is terminal for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemMode {
    /// No tracked position.
    Scanning,
    /// A tracked position exists and is being managed.
    Active,
    /// Automated mutation is suspended until an operator intervenes.
    SafeMode,
}

impl SystemMode {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SafeMode)
    }
}

impl fmt::Display for SystemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Scanning => "SCANNING",
            Self::Active => "ACTIVE",
            Self::SafeMode => "SAFE_MODE",
        };
        f.write_str(label)
    }
}
