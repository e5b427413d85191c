//! Persistence layer.
//!
//! Publishes the oracle's observable state to a JSON file that external
//! readers (the market API routes) poll. The file is replaced via a sibling
//! temp file and `rename`, so a reader sees either the previous snapshot or
//! the new one.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::{OracleError, StateSnapshot};

/// Sink for state snapshots, called after every state-affecting step.
pub trait StatePublisher: Send + Sync {
    fn persist(&self, snapshot: &StateSnapshot) -> Result<(), OracleError>;
}

/// Writes snapshots to a JSON file, creating parent directories as needed.
#[derive(Debug, Clone)]
pub struct JsonFilePublisher {
    path: PathBuf,
}

impl JsonFilePublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StatePublisher for JsonFilePublisher {
    fn persist(&self, snapshot: &StateSnapshot) -> Result<(), OracleError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                OracleError::Storage(format!("Failed to create {}: {e}", dir.display()))
            })?;
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| OracleError::Storage(format!("Failed to serialise state: {e}")))?;

        let tmp = self.temp_path();
        std::fs::write(&tmp, json)
            .map_err(|e| OracleError::Storage(format!("Failed to write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            OracleError::Storage(format!("Failed to replace {}: {e}", self.path.display()))
        })?;

        debug!(
            path = %self.path.display(),
            current_round = ?snapshot.current_round.as_ref().map(|r| r.id),
            history = snapshot.history.len(),
            "State published"
        );
        Ok(())
    }
}

/// Load a previously published snapshot.
/// Returns `None` if the file doesn't exist (fresh start).
pub fn load_snapshot(path: &Path) -> Result<Option<StateSnapshot>, OracleError> {
    if !path.exists() {
        info!(path = %path.display(), "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .map_err(|e| OracleError::Storage(format!("Failed to read {}: {e}", path.display())))?;
    let snapshot: StateSnapshot = serde_json::from_str(&json)
        .map_err(|e| OracleError::Storage(format!("Failed to parse {}: {e}", path.display())))?;

    info!(
        path = %path.display(),
        current_round = ?snapshot.current_round.as_ref().map(|r| r.id),
        history = snapshot.history.len(),
        "State loaded from disk"
    );
    Ok(Some(snapshot))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
