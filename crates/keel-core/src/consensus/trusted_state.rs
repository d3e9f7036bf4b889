use crate::consensus::epoch_change::{verify_epoch_changes, EpochAnchor};
use crate::consensus::quorum::{AggregateVerifier, QuorumCertificateVerifier, VerificationError};
use crate::consensus::waypoint::Waypoint;
use crate::types::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a successful ratchet did to the trusted state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RatchetOutcome {
    /// The proof re-delivered what is already trusted.
    NoChange,
    /// Same epoch, newer version.
    VersionAdvanced,
    /// A new validator set became trusted.
    EpochAdvanced,
}

/// The caller-held checkpoint.
///
/// A client starts in `Bootstrap` with nothing but a waypoint and moves to
/// `Operational` once it has verified the epoch change that the waypoint's
/// record ends. The waypoint always commits to the last accepted record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustedState {
    Bootstrap(Waypoint),
    Operational {
        waypoint: Waypoint,
        /// Validator set authoritative for the epoch after `waypoint`'s
        /// record if that record ended its epoch, else for its epoch.
        epoch_state: EpochState,
    },
}

impl From<Waypoint> for TrustedState {
    fn from(waypoint: Waypoint) -> Self {
        TrustedState::Bootstrap(waypoint)
    }
}

impl TrustedState {
    pub fn waypoint(&self) -> Waypoint {
        match self {
            TrustedState::Bootstrap(waypoint) => *waypoint,
            TrustedState::Operational { waypoint, .. } => *waypoint,
        }
    }

    /// Version of the last accepted record.
    pub fn current_version(&self) -> u64 {
        self.waypoint().version()
    }

    /// `None` while bootstrapping: a waypoint alone carries no epoch.
    pub fn current_epoch(&self) -> Option<u64> {
        self.epoch_state().map(|state| state.epoch)
    }

    pub fn epoch_state(&self) -> Option<&EpochState> {
        match self {
            TrustedState::Bootstrap(_) => None,
            TrustedState::Operational { epoch_state, .. } => Some(epoch_state),
        }
    }

    pub fn validator_set(&self) -> Option<&ValidatorSet> {
        self.epoch_state().map(|state| &state.validator_set)
    }

    pub fn is_bootstrap(&self) -> bool {
        matches!(self, TrustedState::Bootstrap(_))
    }

    fn anchor(&self) -> EpochAnchor<'_> {
        match self {
            TrustedState::Bootstrap(waypoint) => EpochAnchor::Waypoint(waypoint),
            TrustedState::Operational { epoch_state, .. } => EpochAnchor::EpochState(epoch_state),
        }
    }

    /// Verify `proof` against this state with the default SHA-256 / BLS
    /// backends and return the advanced state.
    pub fn verify_and_ratchet(
        &self,
        proof: &StateProof,
    ) -> Result<(TrustedState, RatchetOutcome), VerificationError> {
        self.verify_and_ratchet_with(&QuorumCertificateVerifier::<Sha256Hasher>::default(), proof)
    }

    /// Verify `proof` against this state and return the advanced state.
    ///
    /// `self` is never modified; on error the caller keeps its checkpoint.
    pub fn verify_and_ratchet_with<H: Hasher, A: AggregateVerifier>(
        &self,
        verifier: &QuorumCertificateVerifier<H, A>,
        proof: &StateProof,
    ) -> Result<(TrustedState, RatchetOutcome), VerificationError> {
        let latest = &proof.latest_certificate;
        let record = &latest.signed_record;
        let trusted_version = self.current_version();

        // 1. Re-delivery of the trusted record is a no-op. A bootstrap state
        //    still needs the epoch change its waypoint record hands over.
        if record.version == trusted_version {
            if !self.waypoint().matches_with(record, verifier.hasher()) {
                return Err(VerificationError::ConflictingRecord {
                    version: record.version,
                });
            }
            if !self.is_bootstrap() || proof.epoch_changes.is_empty() {
                return Ok((self.clone(), RatchetOutcome::NoChange));
            }
        }

        // 2. Never go backwards
        if record.version < trusted_version {
            return Err(VerificationError::StaleUpdate {
                proposed: record.version,
                trusted: trusted_version,
            });
        }

        // 3. Establish the validator set for the terminal certificate
        let needs_epoch_change = match self {
            TrustedState::Bootstrap(_) => true,
            TrustedState::Operational { epoch_state, .. } => record.epoch > epoch_state.epoch,
        };

        let (new_waypoint, new_epoch_state) = if needs_epoch_change {
            let change = verify_epoch_changes(verifier, self.anchor(), &proof.epoch_changes)?;
            let last_change = change.last_certificate.map(|cert| &cert.signed_record);

            if last_change == Some(record) {
                // The terminal record is itself the last epoch change
                (Waypoint::new_with(record, verifier.hasher()), change.epoch_state)
            } else if record.epoch == change.epoch_state.epoch {
                // 4. Terminal certificate must be signed by the new set
                verifier.verify(latest, &change.epoch_state.validator_set)?;
                let next = record.next_epoch_state().unwrap_or(change.epoch_state);
                (Waypoint::new_with(record, verifier.hasher()), next)
            } else if record.epoch > change.epoch_state.epoch && proof.epoch_changes.has_more {
                // Truncated chain: stop at the last verified epoch change
                let Some(last) = last_change else {
                    debug!(
                        version = trusted_version,
                        target_version = record.version,
                        "truncated epoch change proof carries nothing past the trusted epoch"
                    );
                    return Ok((self.clone(), RatchetOutcome::NoChange));
                };
                debug!(
                    version = last.version,
                    target_version = record.version,
                    "epoch change proof truncated; ratcheting to last epoch change"
                );
                (Waypoint::new_with(last, verifier.hasher()), change.epoch_state)
            } else {
                return Err(VerificationError::InvalidEpochChangeProof(format!(
                    "Latest certificate is for epoch {}, epoch change proof ends at epoch {}",
                    record.epoch, change.epoch_state.epoch
                )));
            }
        } else {
            let TrustedState::Operational { epoch_state, .. } = self else {
                return Err(VerificationError::InvalidEpochChangeProof(
                    "Bootstrap state requires an epoch change proof".into(),
                ));
            };
            if record.epoch != epoch_state.epoch {
                return Err(VerificationError::EpochMismatch {
                    expected: epoch_state.epoch,
                    got: record.epoch,
                });
            }
            // 4. Same epoch: the trusted set signs
            verifier.verify(latest, &epoch_state.validator_set)?;
            let next = record.next_epoch_state().unwrap_or_else(|| epoch_state.clone());
            (Waypoint::new_with(record, verifier.hasher()), next)
        };

        // 5. Build the new state; nothing above touched `self`
        let outcome = match self.current_epoch() {
            Some(epoch) if epoch == new_epoch_state.epoch => RatchetOutcome::VersionAdvanced,
            _ => RatchetOutcome::EpochAdvanced,
        };
        debug!(
            version = new_waypoint.version(),
            epoch = new_epoch_state.epoch,
            ?outcome,
            "trusted state ratcheted"
        );
        Ok((
            TrustedState::Operational {
                waypoint: new_waypoint,
                epoch_state: new_epoch_state,
            },
            outcome,
        ))
    }
}
