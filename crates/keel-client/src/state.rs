//! In-memory bookkeeping around the trusted checkpoint.

use keel_core::types::HashValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Cache of state values verified against the current trusted record.
///
/// Every entry passed a sparse Merkle proof before it was cached. Entries are
/// tagged with the version they were proven at, and the whole cache is
/// dropped when the trusted version advances.
#[derive(Debug, Default)]
pub struct VerifiedValueCache {
    values: HashMap<HashValue, (u64, Option<Vec<u8>>)>,
    verified_version: u64,
}

impl VerifiedValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate everything when the trusted version advances.
    pub fn on_version_advance(&mut self, new_version: u64) {
        if new_version > self.verified_version {
            self.values.clear();
            self.verified_version = new_version;
        }
    }

    pub fn insert(&mut self, key: HashValue, version: u64, value: Option<Vec<u8>>) {
        self.values.insert(key, (version, value));
    }

    /// `Some(None)` is a cached proof of absence.
    pub fn get(&self, key: &HashValue, current_version: u64) -> Option<&Option<Vec<u8>>> {
        self.values
            .get(key)
            .and_then(|(version, value)| (*version == current_version).then_some(value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Counters describing how syncing has gone so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    /// Version of the trusted record.
    pub head_version: u64,
    /// Trusted epoch, `None` while bootstrapping.
    pub head_epoch: Option<u64>,
    /// Latest version a source has claimed, verified or not.
    pub target_version: Option<u64>,
    pub updates_processed: u64,
    pub updates_rejected: u64,
    pub epoch_changes: u64,
    pub proofs_verified: u64,
    pub proofs_rejected: u64,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of the claimed target reached, in `0.0..=1.0`.
    pub fn sync_percentage(&self) -> f64 {
        match self.target_version {
            Some(target) if target > 0 => (self.head_version as f64 / target as f64).min(1.0),
            _ => 0.0,
        }
    }

    pub fn is_caught_up(&self) -> bool {
        self.target_version
            .map_or(false, |target| self.head_version >= target)
    }
}
