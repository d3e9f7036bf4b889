//! # Keel Client
//!
//! The calling layer around `keel-core`: it owns the trusted checkpoint,
//! fetches proofs from an injected [`ProofSource`], and only ever exposes
//! data that verified against that checkpoint.
//!
//! ## Architecture
//!
//! - All verification happens in `keel-core`; this crate never trusts a byte
//!   from the source without running it through a verifier first
//! - One checkpoint per client, advanced under a lock held across
//!   verify-and-swap, so concurrent syncs serialize
//! - Proof fetching happens outside the lock
//! - The checkpoint is persisted before the in-memory copy advances

pub mod config;
pub mod error;
pub mod source;
pub mod state;
pub mod store;

pub use config::ClientConfig;
pub use error::ClientError;
pub use source::{DirectoryProofSource, ProofSource, StateValueWithProof, TransactionWithProof};
pub use state::{SyncProgress, VerifiedValueCache};
pub use store::{PersistedState, StateStore};

use keel_core::encoding;
use keel_core::proof::{accumulator, sparse_merkle, InclusionItem, ProofError};
use keel_core::types::*;
use keel_core::{
    agree_on_waypoint, Classify, QuorumCertificateVerifier, RatchetOutcome, TrustedState, Waypoint,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

/// The trusted state plus the record its waypoint commits to.
#[derive(Clone, Debug)]
struct Checkpoint {
    state: TrustedState,
    record: Option<SignedRecord>,
}

/// A light client over one proof source.
pub struct LightClient<S> {
    source: S,
    config: ClientConfig,
    verifier: QuorumCertificateVerifier,
    store: Option<StateStore>,
    checkpoint: Mutex<Checkpoint>,
    progress: Mutex<SyncProgress>,
    cache: Mutex<VerifiedValueCache>,
}

/// The record in `proof` that `waypoint` commits to, if any.
fn accepted_record<'p>(proof: &'p StateProof, waypoint: &Waypoint) -> Option<&'p SignedRecord> {
    std::iter::once(&proof.latest_certificate)
        .chain(proof.epoch_changes.certificates.iter().rev())
        .map(|cert| &cert.signed_record)
        .find(|record| waypoint.matches(record))
}

impl<S: ProofSource> LightClient<S> {
    /// Start from an already trusted state.
    pub fn new(source: S, trusted_state: TrustedState, config: ClientConfig) -> Self {
        Self::with_checkpoint(
            source,
            Checkpoint {
                state: trusted_state,
                record: None,
            },
            config,
        )
    }

    fn with_checkpoint(source: S, checkpoint: Checkpoint, config: ClientConfig) -> Self {
        let progress = SyncProgress {
            head_version: checkpoint.state.current_version(),
            head_epoch: checkpoint.state.current_epoch(),
            ..SyncProgress::new()
        };
        Self {
            source,
            store: config.state_path.clone().map(StateStore::new),
            config,
            verifier: QuorumCertificateVerifier::default(),
            checkpoint: Mutex::new(checkpoint),
            progress: Mutex::new(progress),
            cache: Mutex::new(VerifiedValueCache::new()),
        }
    }

    /// Bootstrap from waypoints reported by independent sources.
    ///
    /// This is the one moment of trust: at least
    /// `config.required_waypoint_agreement` sources must report the same
    /// waypoint. Everything after it is verified cryptographically.
    pub fn from_waypoints(source: S, waypoints: &[Waypoint], config: ClientConfig) -> Result<Self, ClientError> {
        let agreed = agree_on_waypoint(waypoints, config.required_waypoint_agreement)?;
        info!(
            waypoint = %agreed.waypoint,
            agreeing = agreed.source_agreement,
            total = agreed.total_sources,
            "bootstrapping from waypoint"
        );
        Ok(Self::new(source, TrustedState::from(agreed.waypoint), config))
    }

    /// Resume from the checkpoint persisted at `config.state_path`.
    pub fn restore(source: S, config: ClientConfig) -> Result<Self, ClientError> {
        let path = config.state_path.clone().ok_or(ClientError::NoStatePath)?;
        let persisted = StateStore::new(&path)
            .load()?
            .ok_or_else(|| ClientError::NoPersistedState {
                path: path.display().to_string(),
            })?;
        info!(
            version = persisted.trusted_state.current_version(),
            epoch = ?persisted.trusted_state.current_epoch(),
            "restored trusted state"
        );
        let checkpoint = Checkpoint {
            state: persisted.trusted_state,
            record: persisted.latest_record,
        };
        Ok(Self::with_checkpoint(source, checkpoint, config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn trusted_state(&self) -> TrustedState {
        self.checkpoint.lock().state.clone()
    }

    pub fn trusted_version(&self) -> u64 {
        self.checkpoint.lock().state.current_version()
    }

    /// The record the trusted waypoint commits to.
    pub fn trusted_record(&self) -> Result<SignedRecord, ClientError> {
        self.checkpoint.lock().record.clone().ok_or(ClientError::NotSynced)
    }

    pub fn progress(&self) -> SyncProgress {
        self.progress.lock().clone()
    }

    /// Write the current checkpoint to the configured state file.
    pub fn persist(&self) -> Result<(), ClientError> {
        let checkpoint = self.checkpoint.lock();
        self.save(&checkpoint)
    }

    fn save(&self, checkpoint: &Checkpoint) -> Result<(), ClientError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        store.save(&PersistedState {
            trusted_state: checkpoint.state.clone(),
            latest_record: checkpoint.record.clone(),
        })
    }

    /// Fetch the latest state proof from the source and ratchet to it.
    pub fn sync(&self) -> Result<RatchetOutcome, ClientError> {
        let known_version = self.trusted_version();

        // 1. Fetch without holding the lock
        let bytes = self.source.state_proof(known_version)?;

        // 2. Decode under the configured size limit
        let proof = encoding::decode::<StateProof>(&bytes, self.config.max_proof_bytes)
            .map_err(|e| self.rejected(e.into()))?;

        self.apply_state_proof(&proof)
    }

    /// Verify `proof` against the checkpoint and advance it on success.
    ///
    /// The lock is held from verification until the new checkpoint is in
    /// place. A concurrent caller with the same proof then sees `NoChange`.
    pub fn apply_state_proof(&self, proof: &StateProof) -> Result<RatchetOutcome, ClientError> {
        let claimed = proof.latest_record().version;
        {
            let mut progress = self.progress.lock();
            progress.target_version = Some(progress.target_version.map_or(claimed, |t| t.max(claimed)));
        }

        // 3. Verify and swap
        let mut checkpoint = self.checkpoint.lock();
        let verified = checkpoint.state.verify_and_ratchet_with(&self.verifier, proof);
        let (next, outcome) = match verified {
            Ok(ratcheted) => ratcheted,
            Err(e) => {
                drop(checkpoint);
                return Err(self.rejected(e.into()));
            }
        };

        let waypoint = next.waypoint();
        let record = accepted_record(proof, &waypoint)
            .cloned()
            .or_else(|| checkpoint.record.clone().filter(|r| waypoint.matches(r)));
        if outcome == RatchetOutcome::NoChange && record == checkpoint.record {
            debug!(version = waypoint.version(), "state proof carried nothing new");
            return Ok(outcome);
        }

        // 4. Persist first; on failure the in-memory checkpoint stays put
        let updated = Checkpoint { state: next, record };
        self.save(&updated)?;
        *checkpoint = updated;

        // 5. Bookkeeping
        let head_epoch = checkpoint.state.current_epoch();
        {
            let mut progress = self.progress.lock();
            progress.head_version = waypoint.version();
            progress.head_epoch = head_epoch;
            if outcome != RatchetOutcome::NoChange {
                progress.updates_processed += 1;
            }
            if outcome == RatchetOutcome::EpochAdvanced {
                progress.epoch_changes += 1;
            }
        }
        self.cache.lock().on_version_advance(waypoint.version());

        info!(
            version = waypoint.version(),
            epoch = ?head_epoch,
            ?outcome,
            "trusted state advanced"
        );
        Ok(outcome)
    }

    /// Count and log a rejected state proof.
    fn rejected(&self, err: ClientError) -> ClientError {
        self.progress.lock().updates_rejected += 1;
        match err.kind() {
            Some(kind) if kind.is_attack_signal() => {
                error!(%kind, error = %err, "state proof rejected; source may be malicious")
            }
            Some(kind) if kind.is_benign() => debug!(%kind, error = %err, "state proof ignored"),
            Some(kind) => warn!(%kind, error = %err, "state proof rejected"),
            None => warn!(error = %err, "state proof rejected"),
        }
        err
    }

    fn checked<T>(&self, result: Result<T, ProofError>) -> Result<T, ClientError> {
        let mut progress = self.progress.lock();
        match result {
            Ok(value) => {
                progress.proofs_verified += 1;
                Ok(value)
            }
            Err(e) => {
                progress.proofs_rejected += 1;
                warn!(kind = %e.kind(), error = %e, "proof rejected");
                Err(e.into())
            }
        }
    }

    fn record_covering(&self, version: u64) -> Result<SignedRecord, ClientError> {
        let record = self.trusted_record()?;
        if version >= record.accumulator_leaf_count() {
            return Err(ClientError::BeyondTrustedVersion {
                requested: version,
                trusted: record.version,
            });
        }
        Ok(record)
    }

    /// Fetch the transaction at `version` and prove it is in the trusted
    /// accumulator.
    pub fn get_transaction(&self, version: u64) -> Result<Vec<u8>, ClientError> {
        let record = self.record_covering(version)?;
        let fetched = self.source.transaction_proof(version, record.version)?;

        // Position comes from the request, never from the source's answer
        let leaf_hash = accumulator_leaf_hash(self.verifier.hasher(), &fetched.transaction);
        self.checked(accumulator::verify_inclusion(
            self.verifier.hasher(),
            record.accumulator_root,
            leaf_hash,
            version,
            &fetched.proof,
        ))?;
        Ok(fetched.transaction)
    }

    /// Like [`get_transaction`](Self::get_transaction) for many versions,
    /// verified as one batch (on the rayon pool if configured).
    pub fn get_transactions(&self, versions: &[u64]) -> Result<Vec<Vec<u8>>, ClientError> {
        let Some(&highest) = versions.iter().max() else {
            return Ok(Vec::new());
        };
        let record = self.record_covering(highest)?;

        let mut items = Vec::with_capacity(versions.len());
        let mut transactions = Vec::with_capacity(versions.len());
        for &version in versions {
            let fetched = self.source.transaction_proof(version, record.version)?;
            items.push(InclusionItem {
                leaf_hash: accumulator_leaf_hash(self.verifier.hasher(), &fetched.transaction),
                index: version,
                proof: fetched.proof,
            });
            transactions.push(fetched.transaction);
        }

        self.checked(accumulator::verify_inclusion_batch(
            self.verifier.hasher(),
            record.accumulator_root,
            &items,
            self.config.verify_parallel,
        ))?;
        Ok(transactions)
    }

    /// Value stored under `key` in the trusted state tree, `None` if absent.
    pub fn get_state_value(&self, key: HashValue) -> Result<Option<Vec<u8>>, ClientError> {
        let record = self.trusted_record()?;
        if let Some(cached) = self.cache.lock().get(&key, record.version) {
            return Ok(cached.clone());
        }

        let fetched = self.source.state_value_proof(key, record.version)?;
        let hash = fetched
            .value
            .as_deref()
            .map(|value| value_hash(self.verifier.hasher(), value));
        self.checked(sparse_merkle::verify(
            self.verifier.hasher(),
            record.state_root,
            key,
            hash,
            &fetched.proof,
        ))?;

        self.cache.lock().insert(key, record.version, fetched.value.clone());
        Ok(fetched.value)
    }
}
