use crate::types::hash::{tags, HashValue, Hasher, Sha256Hasher};
use crate::types::validator::*;
use serde::{Deserialize, Serialize};

/// A commitment to ledger state at a version, as signed by an epoch's
/// validators.
///
/// The last record of an epoch carries `next_validator_set`, the set that is
/// authoritative for `epoch + 1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedRecord {
    /// Epoch whose validator set signs this record.
    pub epoch: u64,
    /// Version of the latest transaction committed by this record.
    pub version: u64,
    /// Root of the sparse Merkle tree over key-value state.
    pub state_root: HashValue,
    /// Root of the transaction accumulator; it holds `version + 1` leaves.
    pub accumulator_root: HashValue,
    /// Commit timestamp in microseconds.
    pub timestamp_usecs: u64,
    /// Present only on the record that ends `epoch`.
    pub next_validator_set: Option<ValidatorSet>,
}

impl SignedRecord {
    /// Whether this record ends its epoch.
    pub fn ends_epoch(&self) -> bool {
        self.next_validator_set.is_some()
    }

    /// Epoch in force after this record commits.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn next_block_epoch(&self) -> u64 {
        if self.ends_epoch() {
            self.epoch + 1
        } else {
            self.epoch
        }
    }

    /// The epoch state this record hands over to, if it ends its epoch.
    pub fn next_epoch_state(&self) -> Option<EpochState> {
        self.next_validator_set
            .as_ref()
            .map(|set| EpochState::new(self.epoch + 1, set.clone()))
    }

    /// Number of leaves in the transaction accumulator at this record.
    pub fn accumulator_leaf_count(&self) -> u64 {
        self.version.saturating_add(1)
    }

    /// Deterministic byte encoding covered by the signature.
    ///
    /// Layout (all integers little-endian):
    /// `epoch u64 | version u64 | state_root 32 | accumulator_root 32 |
    ///  timestamp u64 | 0x00` or
    /// `... | 0x01 | n u32 | n × (id 32 | public_key 48 | voting_power u64)`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let set_len = self.next_validator_set.as_ref().map_or(0, |s| s.len());
        let mut out = Vec::with_capacity(8 * 3 + 32 * 2 + 1 + 4 + set_len * 88);
        out.extend_from_slice(&self.epoch.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(self.state_root.as_bytes());
        out.extend_from_slice(self.accumulator_root.as_bytes());
        out.extend_from_slice(&self.timestamp_usecs.to_le_bytes());
        match &self.next_validator_set {
            None => out.push(0),
            Some(set) => {
                out.push(1);
                out.extend_from_slice(&(set.len() as u32).to_le_bytes());
                for v in set.validators() {
                    out.extend_from_slice(v.id.as_bytes());
                    out.extend_from_slice(v.public_key.as_bytes());
                    out.extend_from_slice(&v.voting_power.to_le_bytes());
                }
            }
        }
        out
    }

    /// Canonical hash with the default backend; this is what validators sign
    /// and what a waypoint commits to.
    pub fn hash(&self) -> HashValue {
        self.hash_with(&Sha256Hasher)
    }

    pub fn hash_with<H: Hasher>(&self, hasher: &H) -> HashValue {
        hasher.tagged(tags::SIGNED_RECORD, &[&self.signing_bytes()])
    }
}

/// Proof that at least a quorum of an epoch's voting power signed a record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumCertificate {
    pub signed_record: SignedRecord,
    /// Which members of the signing epoch's validator set contributed.
    pub signer_bitmask: SignerBitmask,
    /// BLS aggregate of the contributing members' signatures.
    pub aggregate_signature: BlsSignature,
}

impl QuorumCertificate {
    pub fn new(
        signed_record: SignedRecord,
        signer_bitmask: SignerBitmask,
        aggregate_signature: BlsSignature,
    ) -> Self {
        Self {
            signed_record,
            signer_bitmask,
            aggregate_signature,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.signed_record.epoch
    }

    pub fn version(&self) -> u64 {
        self.signed_record.version
    }
}

/// Ordered chain of epoch-ending certificates.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochChangeProof {
    pub certificates: Vec<QuorumCertificate>,
    /// The source truncated the chain; more certificates exist past the last one.
    pub has_more: bool,
}

impl EpochChangeProof {
    pub fn new(certificates: Vec<QuorumCertificate>, has_more: bool) -> Self {
        Self {
            certificates,
            has_more,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

/// Response to "advance me from version V to the latest".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProof {
    pub latest_certificate: QuorumCertificate,
    pub epoch_changes: EpochChangeProof,
}

impl StateProof {
    pub fn new(latest_certificate: QuorumCertificate, epoch_changes: EpochChangeProof) -> Self {
        Self {
            latest_certificate,
            epoch_changes,
        }
    }

    pub fn latest_record(&self) -> &SignedRecord {
        &self.latest_certificate.signed_record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SignedRecord {
        SignedRecord {
            epoch: 3,
            version: 1000,
            state_root: HashValue::new([1; 32]),
            accumulator_root: HashValue::new([2; 32]),
            timestamp_usecs: 1_700_000_000_000_000,
            next_validator_set: None,
        }
    }

    #[test]
    fn test_record_hash_deterministic() {
        assert_eq!(record().hash(), record().hash());
    }

    #[test]
    fn test_record_hash_binds_every_field() {
        let base = record().hash();

        let mut r = record();
        r.epoch += 1;
        assert_ne!(r.hash(), base);

        let mut r = record();
        r.version += 1;
        assert_ne!(r.hash(), base);

        let mut r = record();
        r.state_root = HashValue::new([9; 32]);
        assert_ne!(r.hash(), base);

        let mut r = record();
        r.accumulator_root = HashValue::new([9; 32]);
        assert_ne!(r.hash(), base);

        let mut r = record();
        r.timestamp_usecs += 1;
        assert_ne!(r.hash(), base);

        let mut r = record();
        r.next_validator_set = Some(ValidatorSet::new(vec![]).unwrap());
        assert_ne!(r.hash(), base);
    }

    #[test]
    fn test_backends_disagree() {
        use crate::types::hash::Sha3Hasher;
        assert_ne!(record().hash_with(&Sha3Hasher), record().hash());
    }

    #[test]
    fn test_next_block_epoch() {
        let mut r = record();
        assert_eq!(r.next_block_epoch(), 3);
        assert!(r.next_epoch_state().is_none());
        r.next_validator_set = Some(ValidatorSet::new(vec![]).unwrap());
        assert_eq!(r.next_block_epoch(), 4);
        assert_eq!(r.next_epoch_state().unwrap().epoch, 4);
    }

    #[test]
    fn test_accumulator_leaf_count() {
        assert_eq!(record().accumulator_leaf_count(), 1001);
    }
}
