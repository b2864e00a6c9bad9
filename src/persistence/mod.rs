use crate::execution::EngineState;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("state file is not valid engine state: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// JSON snapshot of the engine state between ticks
///
/// Writes go to a sibling temp file first and are renamed into place, so a
/// crash mid-write leaves the previous snapshot intact.
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

    /// Load the last snapshot, or a fresh state when none exists yet
    pub fn load(&self) -> Result<EngineState, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                let state: EngineState = serde_json::from_str(&raw)?;
                tracing::info!(
                    path = %self.path.display(),
                    instruments = state.instruments.len(),
                    "loaded engine state"
                );
                Ok(state)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "no saved state, starting fresh");
                Ok(EngineState::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, state: &EngineState) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "saved engine state");
        Ok(())
    }
}
