//! Persisted checkpoint.
//!
//! The file holds the trusted state and the record it commits to as JSON.
//! Reloading it restores exactly the trust boundary that was saved: the
//! record is checked against the waypoint before it is used.

use crate::error::ClientError;
use keel_core::types::SignedRecord;
use keel_core::TrustedState;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// What gets written to disk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub trusted_state: TrustedState,
    /// The record the waypoint commits to, once one has been seen.
    #[serde(default)]
    pub latest_record: Option<SignedRecord>,
}

#[derive(Clone, Debug)]
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

    fn io_error(&self, source: std::io::Error) -> ClientError {
        ClientError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// `Ok(None)` if nothing has been saved yet.
    pub fn load(&self) -> Result<Option<PersistedState>, ClientError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };
        let state: PersistedState = serde_json::from_str(&text).map_err(|source| ClientError::Json {
            path: self.path.display().to_string(),
            source,
        })?;

        if let Some(record) = &state.latest_record {
            state
                .trusted_state
                .waypoint()
                .verify(record)
                .map_err(ClientError::Waypoint)?;
        }
        Ok(Some(state))
    }

    /// Write to a sibling temp file, then rename over the old state so a
    /// crash never leaves a half-written checkpoint.
    pub fn save(&self, state: &PersistedState) -> Result<(), ClientError> {
        let json = serde_json::to_vec_pretty(state).map_err(|source| ClientError::Json {
            path: self.path.display().to_string(),
            source,
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}
