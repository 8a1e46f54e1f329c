//! Durable record of the tracked position.
//!
//! The record is written atomically (temp file, fsync, rename) so a crash
//! leaves either the previous or the new record on disk, never a torn one.
//! Loading never fails: a missing or corrupted file reads as "no position"
//! and the reconciler recovers from the ledger.

use clmm_keeper_domain::entities::{PositionId, PositionRecord};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Default state file name.
pub const DEFAULT_STATE_FILE: &str = "keeper_state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the record, degrading to the default on any failure.
    pub fn load(&self) -> PositionRecord {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting empty");
                return PositionRecord::default();
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file unreadable, starting empty"
                );
                return PositionRecord::default();
            }
        };

        match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file corrupted, starting empty"
                );
                PositionRecord::default()
            }
        }
    }

    /// Persists `position` with the current wall clock time.
    pub fn save(&self, position: Option<&PositionId>) -> Result<PositionRecord, StateError> {
        let record = PositionRecord::new(position.cloned(), now_millis());
        self.write(&record)?;
        debug!(
            position = position.map(PositionId::as_str).unwrap_or("none"),
            "State saved"
        );
        Ok(record)
    }

    fn write(&self, record: &PositionRecord) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(record)?;
        let temp_path = self.temp_path();
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StateError::Io { path, source }
        };

        let mut file = fs::File::create(&temp_path).map_err(io_err(&temp_path))?;
        file.write_all(json.as_bytes()).map_err(io_err(&temp_path))?;
        file.sync_all().map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &self.path).map_err(io_err(&self.path))?;
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }
}

fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
