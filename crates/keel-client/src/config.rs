//! Client configuration, loaded from a JSON file. Every field has a default
//! so a partial (or empty) file is valid.

use crate::error::ClientError;
use keel_core::encoding::MAX_STATE_PROOF_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the trusted checkpoint is persisted. `None` keeps it in memory.
    pub state_path: Option<PathBuf>,
    /// Largest state proof bundle accepted from a source, in bytes.
    pub max_proof_bytes: usize,
    /// How many waypoint sources must agree before bootstrapping.
    pub required_waypoint_agreement: usize,
    /// Check transaction batches on the rayon pool. Only has an effect when
    /// built with the `parallel` feature.
    pub verify_parallel: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            max_proof_bytes: MAX_STATE_PROOF_BYTES,
            required_waypoint_agreement: 1,
            verify_parallel: false,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let text = fs::read_to_string(path).map_err(|source| ClientError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ClientError::Json {
            path: path.display().to_string(),
            source,
        })
    }
}
