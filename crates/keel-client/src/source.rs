//! Where proofs come from.
//!
//! Sources are untrusted: everything they return is checked by
//! [`LightClient`](crate::LightClient) before it is used. The client never
//! retries; a caller that wants fallback sources wraps several of them.

use crate::error::ClientError;
use keel_core::encoding;
use keel_core::proof::{AccumulatorProof, SparseMerkleProof};
use keel_core::types::HashValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A transaction payload with its accumulator inclusion proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionWithProof {
    pub version: u64,
    pub transaction: Vec<u8>,
    pub proof: AccumulatorProof,
}

/// A state value (or its absence) with its sparse Merkle proof.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValueWithProof {
    pub key: HashValue,
    pub value: Option<Vec<u8>>,
    pub proof: SparseMerkleProof,
}

/// Untrusted provider of state proofs and per-item proofs.
pub trait ProofSource: Send + Sync {
    /// Encoded [`StateProof`](keel_core::StateProof) taking a client that
    /// trusts `known_version` to the source's latest record.
    fn state_proof(&self, known_version: u64) -> Result<Vec<u8>, ClientError>;

    /// Transaction at `version` proven against the accumulator of the record
    /// at `ledger_version`.
    fn transaction_proof(&self, version: u64, ledger_version: u64) -> Result<TransactionWithProof, ClientError>;

    /// Value under `key` proven against the state root of the record at
    /// `ledger_version`.
    fn state_value_proof(&self, key: HashValue, ledger_version: u64) -> Result<StateValueWithProof, ClientError>;
}

impl<S: ProofSource + ?Sized> ProofSource for Box<S> {
    fn state_proof(&self, known_version: u64) -> Result<Vec<u8>, ClientError> {
        (**self).state_proof(known_version)
    }

    fn transaction_proof(&self, version: u64, ledger_version: u64) -> Result<TransactionWithProof, ClientError> {
        (**self).transaction_proof(version, ledger_version)
    }

    fn state_value_proof(&self, key: HashValue, ledger_version: u64) -> Result<StateValueWithProof, ClientError> {
        (**self).state_value_proof(key, ledger_version)
    }
}

/// Proofs laid out in a directory, as exported by a full node:
///
/// ```text
/// <root>/state_proof.bcs
/// <root>/transactions/<version>.bcs
/// <root>/state/<key hex>.bcs
/// ```
///
/// The directory holds a single snapshot, so `known_version` and
/// `ledger_version` are not used to pick files.
#[derive(Clone, Debug)]
pub struct DirectoryProofSource {
    root: PathBuf,
    max_bytes: usize,
}

impl DirectoryProofSource {
    pub fn new(root: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_bytes,
        }
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>, ClientError> {
        fs::read(path).map_err(|e| ClientError::Source(format!("{}: {}", path.display(), e)))
    }

    fn read_decoded<T: serde::de::DeserializeOwned>(&self, path: &Path) -> Result<T, ClientError> {
        let bytes = self.read(path)?;
        Ok(encoding::decode(&bytes, self.max_bytes)?)
    }
}

impl ProofSource for DirectoryProofSource {
    fn state_proof(&self, _known_version: u64) -> Result<Vec<u8>, ClientError> {
        self.read(&self.root.join("state_proof.bcs"))
    }

    fn transaction_proof(&self, version: u64, _ledger_version: u64) -> Result<TransactionWithProof, ClientError> {
        self.read_decoded(&self.root.join("transactions").join(format!("{version}.bcs")))
    }

    fn state_value_proof(&self, key: HashValue, _ledger_version: u64) -> Result<StateValueWithProof, ClientError> {
        self.read_decoded(&self.root.join("state").join(format!("{}.bcs", key.to_hex())))
    }
}
