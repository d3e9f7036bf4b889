//! Canonical binary encoding (`bcs`) for proof bundles and their parts.

use crate::error::{Classify, ErrorKind};
use crate::types::StateProof;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Upper bound on an encoded [`StateProof`]. Typical bundles are tens of
/// kilobytes; a long epoch-change chain with large validator sets stays well
/// under this.
pub const MAX_STATE_PROOF_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Encoded input is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("Failed to decode {what}: {reason}")]
    Decode { what: &'static str, reason: String },

    #[error("Failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },
}

impl Classify for EncodingError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::MalformedEncoding
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

/// Encode any wire type.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodingError> {
    bcs::to_bytes(value).map_err(|e| EncodingError::Encode {
        what: short_type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode any wire type, rejecting input over `max_bytes` and trailing bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8], max_bytes: usize) -> Result<T, EncodingError> {
    if bytes.len() > max_bytes {
        return Err(EncodingError::TooLarge {
            size: bytes.len(),
            max: max_bytes,
        });
    }
    bcs::from_bytes(bytes).map_err(|e| EncodingError::Decode {
        what: short_type_name::<T>(),
        reason: e.to_string(),
    })
}

pub fn encode_state_proof(proof: &StateProof) -> Result<Vec<u8>, EncodingError> {
    encode(proof)
}

/// Decode a state proof bundle with the default size limit.
///
/// Structural checks run here: signer bitmask byte counts and padding,
/// validator powers and duplicates. Whether a bitmask matches the size of the
/// set it is checked against is decided at verification time.
pub fn decode_state_proof(bytes: &[u8]) -> Result<StateProof, EncodingError> {
    decode(bytes, MAX_STATE_PROOF_BYTES)
}
