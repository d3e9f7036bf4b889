//! Error kinds shared by every verifier.
//!
//! Each module keeps its own concrete error enum; [`ErrorKind`] is the
//! coarse classification callers use to decide what to do next.

use std::fmt;

/// Coarse classification of a verification failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The proposed version is behind the trusted one. Ignore and retry later.
    StaleUpdate,
    /// Signers hold too little voting power. A better proof may exist.
    QuorumNotMet,
    /// An aggregate signature failed. Treat as a potential attack.
    InvalidSignature,
    /// The epoch-change chain is broken or out of order.
    InvalidEpochChangeProof,
    /// A Merkle recomputation did not reach the claimed root.
    ProofMismatch,
    /// Structural decode-time error.
    MalformedEncoding,
}

impl ErrorKind {
    /// Errors that indicate a malicious or broken proof source.
    pub fn is_attack_signal(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidSignature | ErrorKind::InvalidEpochChangeProof
        )
    }

    /// Errors that are expected in normal operation and need no escalation.
    pub fn is_benign(&self) -> bool {
        matches!(self, ErrorKind::StaleUpdate)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::StaleUpdate => "stale update",
            ErrorKind::QuorumNotMet => "quorum not met",
            ErrorKind::InvalidSignature => "invalid signature",
            ErrorKind::InvalidEpochChangeProof => "invalid epoch change proof",
            ErrorKind::ProofMismatch => "proof mismatch",
            ErrorKind::MalformedEncoding => "malformed encoding",
        };
        f.write_str(name)
    }
}

/// Implemented by every error type in this crate.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
