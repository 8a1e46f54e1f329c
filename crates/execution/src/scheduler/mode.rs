use clmm_keeper_domain::enums::SystemMode;
use std::sync::atomic::{AtomicU8, Ordering};

const SCANNING: u8 = 0;
const ACTIVE: u8 = 1;
const SAFE_MODE: u8 = 2;

fn encode(mode: SystemMode) -> u8 {
    match mode {
        SystemMode::Scanning => SCANNING,
        SystemMode::Active => ACTIVE,
        SystemMode::SafeMode => SAFE_MODE,
    }
}

fn decode(raw: u8) -> SystemMode {
    match raw {
        SCANNING => SystemMode::Scanning,
        ACTIVE => SystemMode::Active,
        _ => SystemMode::SafeMode,
    }
}

/// Shared, lock-free holder of the keeper's [`SystemMode`].
///
/// Once `SafeMode` is entered no transition leaves it.
#[derive(Debug)]
pub struct ModeCell {
    mode: AtomicU8,
}

impl ModeCell {
    pub fn new(mode: SystemMode) -> Self {
        Self {
            mode: AtomicU8::new(encode(mode)),
        }
    }

    pub fn get(&self) -> SystemMode {
        decode(self.mode.load(Ordering::SeqCst))
    }

    pub fn is_safe_mode(&self) -> bool {
        self.get().is_terminal()
    }

    /// Moves to `to` unless safe mode is active. Returns whether it moved.
    pub fn transition(&self, to: SystemMode) -> bool {
        self.mode
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current != SAFE_MODE).then_some(encode(to))
            })
            .is_ok()
    }

    /// Returns `true` only for the call that actually entered safe mode.
    pub fn enter_safe_mode(&self) -> bool {
        self.mode.swap(SAFE_MODE, Ordering::SeqCst) != SAFE_MODE
    }
}

impl Default for ModeCell {
    fn default() -> Self {
        Self::new(SystemMode::Scanning)
    }
}
