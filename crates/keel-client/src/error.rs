use keel_core::proof::ProofError;
use keel_core::{Classify, EncodingError, ErrorKind, VerificationError, WaypointError};
use thiserror::Error;

/// Errors surfaced by [`LightClient`](crate::LightClient).
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Proof source error: {0}")]
    Source(String),

    #[error("No verified record yet; sync before querying")]
    NotSynced,

    #[error("No state_path configured")]
    NoStatePath,

    #[error("No persisted state at {path}")]
    NoPersistedState { path: String },

    #[error("Version {requested} is beyond the trusted version {trusted}")]
    BeyondTrustedVersion { requested: u64, trusted: u64 },

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Waypoint(#[from] WaypointError),

    #[error("State file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is not valid JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ClientError {
    /// Verification kind for errors that came out of the core verifiers.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Verification(e) => Some(e.kind()),
            ClientError::Proof(e) => Some(e.kind()),
            ClientError::Encoding(e) => Some(e.kind()),
            ClientError::Waypoint(e) => Some(e.kind()),
            _ => None,
        }
    }
}
