//! # Keel Core
//!
//! Pure Rust light-client verification logic for a BFT-replicated ledger.
//!
//! This crate contains **no networking code** and **no global state**. Every
//! record, validator set and proof fetched from an untrusted source passes
//! through these functions before it is trusted.
//!
//! ## Trust Model
//!
//! - **Quorum certificates** (`consensus` module): BLS12-381 aggregate
//!   signatures from an epoch's validator set. Trusts that more than 2/3 of
//!   the voting power is honest.
//!
//! - **Epoch changes** (`consensus` module): each validator set is vouched
//!   for by a quorum of the previous one, back to a waypoint the client got
//!   out of band.
//!
//! - **Merkle proofs** (`proof` module): accumulator and sparse Merkle
//!   proofs against roots from an accepted record. No trust assumptions
//!   beyond the root.
//!
//! ## Usage
//!
//! ```ignore
//! use keel_core::{decode_state_proof, TrustedState, Waypoint};
//!
//! let state = TrustedState::from("0:…".parse::<Waypoint>()?);
//! let proof = decode_state_proof(&bytes)?;
//! let (state, outcome) = state.verify_and_ratchet(&proof)?;
//! ```

pub mod consensus;
pub mod encoding;
pub mod error;
pub mod proof;
pub mod types;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-export commonly used types for convenience
pub use consensus::{
    epoch_change::{verify_epoch_changes, EpochAnchor, VerifiedEpochChange},
    quorum::{
        verify_quorum_certificate, AggregateVerifier, BlsAggregateVerifier,
        QuorumCertificateVerifier, VerificationError,
    },
    trusted_state::{RatchetOutcome, TrustedState},
    waypoint::{agree_on_waypoint, AgreedWaypoint, Waypoint, WaypointError},
};
pub use encoding::{decode_state_proof, encode_state_proof, EncodingError};
pub use error::{Classify, ErrorKind};
pub use proof::ProofError;
pub use types::*;
