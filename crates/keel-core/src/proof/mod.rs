//! Merkle proof verification against trusted roots.
//!
//! Roots passed to these functions must come from a [`SignedRecord`] the
//! ratchet has accepted. Never verify against a root supplied by the same
//! untrusted source as the proof.
//!
//! [`SignedRecord`]: crate::types::SignedRecord

pub mod accumulator;
pub mod sparse_merkle;

pub use accumulator::{
    AccumulatorConsistencyProof, AccumulatorProof, AccumulatorRangeProof, InclusionItem,
};
pub use sparse_merkle::{SparseMerkleLeafNode, SparseMerkleProof, SparseMerkleRangeProof};

use crate::error::{Classify, ErrorKind};
use crate::types::HashValue;
use thiserror::Error;

/// Errors during accumulator and sparse Merkle proof verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error("Proof verification failed: computed root {computed} does not match expected root {expected}")]
    RootMismatch {
        computed: HashValue,
        expected: HashValue,
    },

    #[error("Proof has {got} siblings, maximum is {max}")]
    TooManySiblings { got: usize, max: usize },

    #[error("Leaf index {index} does not fit a proof of depth {depth}")]
    IndexOutOfRange { index: u64, depth: usize },

    #[error("Range starting at {first_index} with {count} leaves overflows the index space")]
    RangeOverflow { first_index: u64, count: usize },

    #[error("Empty range must come with empty sibling lists")]
    NonEmptySiblingsForEmptyRange,

    #[error("Range proof is missing a {side} sibling")]
    MissingSibling { side: &'static str },

    #[error("Old leaf count {old_count} exceeds new leaf count {new_count}")]
    ShrinkingAccumulator { old_count: u64, new_count: u64 },

    #[error("Consistency proof carries {got} subtree roots, expected {expected}")]
    SubtreeCountMismatch { got: usize, expected: usize },

    #[error("Proof leaf is for key {proof_key}, expected key {key}")]
    KeyMismatch { key: HashValue, proof_key: HashValue },

    #[error("Value hash mismatch for key {key}: proof has {proof_value_hash}")]
    ValueMismatch {
        key: HashValue,
        proof_value_hash: HashValue,
    },

    #[error("Expected inclusion of key {key}, proof shows it absent")]
    ExpectedInclusion { key: HashValue },

    #[error("Expected non-inclusion of key {key}, proof shows it present")]
    ExpectedNonInclusion { key: HashValue },

    #[error("Proof leaf {leaf_key} shares only {common_prefix} bits with key {key}, proof depth is {depth}")]
    LeafTooDeep {
        key: HashValue,
        leaf_key: HashValue,
        common_prefix: usize,
        depth: usize,
    },

    #[error("Root depth {root_depth} plus {siblings} siblings exceeds the key length")]
    InvalidRootDepth { root_depth: usize, siblings: usize },

    #[error("Range proof leaves must be sorted by strictly ascending key; violation at position {position}")]
    UnsortedLeaves { position: usize },

    #[error("Range proof needs at least one known leaf")]
    EmptyLeaves,

    #[error("Range proof has {remaining} unused right siblings")]
    UnusedSiblings { remaining: usize },

    #[error("Batch item {position} failed: {source}")]
    Batch {
        position: usize,
        #[source]
        source: Box<ProofError>,
    },
}

impl Classify for ProofError {
    fn kind(&self) -> ErrorKind {
        match self {
            ProofError::TooManySiblings { .. }
            | ProofError::RangeOverflow { .. }
            | ProofError::NonEmptySiblingsForEmptyRange
            | ProofError::ShrinkingAccumulator { .. }
            | ProofError::SubtreeCountMismatch { .. }
            | ProofError::InvalidRootDepth { .. }
            | ProofError::UnsortedLeaves { .. }
            | ProofError::EmptyLeaves => ErrorKind::MalformedEncoding,
            ProofError::Batch { source, .. } => source.kind(),
            _ => ErrorKind::ProofMismatch,
        }
    }
}

/// Compare a recomputed root against the trusted one.
pub(crate) fn ensure_root(computed: HashValue, expected: HashValue) -> Result<(), ProofError> {
    if computed != expected {
        return Err(ProofError::RootMismatch { computed, expected });
    }
    Ok(())
}
