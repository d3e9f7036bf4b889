use crate::error::{Classify, ErrorKind};
use crate::types::*;
use thiserror::Error;
use tracing::debug;

/// Domain separation tag for BLS signatures over signed records
/// (BLS12-381, signatures in G2, proof-of-possession scheme).
pub const DST_BLS_SIG_IN_G2_WITH_POP: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Errors that can occur while verifying certificates and ratcheting state.
/// Each variant names the specific failure; [`Classify::kind`] maps it onto
/// the shared taxonomy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Insufficient voting power: {voting_power} signed, quorum is {required}")]
    QuorumNotMet { voting_power: u128, required: u128 },

    #[error("Invalid BLS signature: the aggregate signature does not verify against the signing validators")]
    InvalidSignature,

    #[error("Invalid BLS public key for validator at index {index}: {reason}")]
    InvalidPublicKey { index: usize, reason: String },

    #[error("BLS aggregation error: {0}")]
    BlsError(String),

    #[error("Signer bitmask covers {got} validators, the validator set has {expected}")]
    BitmaskLengthMismatch { got: usize, expected: usize },

    #[error("Certificate is for epoch {got}, trusted validator set is for epoch {expected}")]
    EpochMismatch { expected: u64, got: u64 },

    #[error("Proposed version {proposed} is older than trusted version {trusted}")]
    StaleUpdate { proposed: u64, trusted: u64 },

    #[error("Record at version {version} does not match the trusted waypoint")]
    ConflictingRecord { version: u64 },

    #[error("Record at version {version} does not match the bootstrap waypoint")]
    WaypointMismatch { version: u64 },

    #[error("Invalid epoch change proof: {0}")]
    InvalidEpochChangeProof(String),
}

impl Classify for VerificationError {
    fn kind(&self) -> ErrorKind {
        match self {
            VerificationError::QuorumNotMet { .. } => ErrorKind::QuorumNotMet,
            VerificationError::InvalidSignature
            | VerificationError::InvalidPublicKey { .. }
            | VerificationError::BlsError(_) => ErrorKind::InvalidSignature,
            VerificationError::BitmaskLengthMismatch { .. } => ErrorKind::MalformedEncoding,
            VerificationError::EpochMismatch { .. }
            | VerificationError::WaypointMismatch { .. }
            | VerificationError::InvalidEpochChangeProof(_) => ErrorKind::InvalidEpochChangeProof,
            VerificationError::StaleUpdate { .. } => ErrorKind::StaleUpdate,
            VerificationError::ConflictingRecord { .. } => ErrorKind::ProofMismatch,
        }
    }
}

/// Aggregate-signature capability: checks one signature over `message`
/// against the aggregate of `public_keys`.
pub trait AggregateVerifier: Send + Sync {
    fn verify_aggregate(
        &self,
        message: &[u8],
        public_keys: &[&BlsPublicKey],
        signature: &BlsSignature,
    ) -> Result<(), VerificationError>;
}

/// BLS12-381 (min-pk) aggregate verification backed by `blst`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlsAggregateVerifier;

impl AggregateVerifier for BlsAggregateVerifier {
    fn verify_aggregate(
        &self,
        message: &[u8],
        public_keys: &[&BlsPublicKey],
        signature: &BlsSignature,
    ) -> Result<(), VerificationError> {
        use blst::min_pk::{AggregatePublicKey, PublicKey, Signature};
        use blst::BLST_ERROR;

        if public_keys.is_empty() {
            return Err(VerificationError::BlsError(
                "Cannot aggregate an empty set of public keys".into(),
            ));
        }

        let sig = Signature::from_bytes(&signature.0).map_err(|_| VerificationError::InvalidSignature)?;

        // Subgroup and infinity checks happen here, once per key
        let pks: Vec<PublicKey> = public_keys
            .iter()
            .enumerate()
            .map(|(i, pk)| {
                PublicKey::key_validate(&pk.0).map_err(|e| VerificationError::InvalidPublicKey {
                    index: i,
                    reason: format!("{:?}", e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pk_refs: Vec<&PublicKey> = pks.iter().collect();
        let agg_pk = AggregatePublicKey::aggregate(&pk_refs, false).map_err(|e| {
            VerificationError::BlsError(format!("Failed to aggregate public keys: {:?}", e))
        })?;

        let result = sig.verify(
            true,
            message,
            DST_BLS_SIG_IN_G2_WITH_POP,
            &[],
            &agg_pk.to_public_key(),
            false,
        );
        if result != BLST_ERROR::BLST_SUCCESS {
            return Err(VerificationError::InvalidSignature);
        }

        Ok(())
    }
}

/// Sum the voting power selected by `bitmask` and check it against the set's
/// quorum. Returns the signed voting power.
pub fn check_voting_power(
    validator_set: &ValidatorSet,
    bitmask: &SignerBitmask,
) -> Result<u128, VerificationError> {
    if bitmask.len() != validator_set.len() {
        return Err(VerificationError::BitmaskLengthMismatch {
            got: bitmask.len(),
            expected: validator_set.len(),
        });
    }

    let voting_power: u128 = bitmask
        .iter_ones()
        .filter_map(|i| validator_set.get(i))
        .map(|v| v.voting_power as u128)
        .sum();

    if voting_power < validator_set.quorum_voting_power() {
        return Err(VerificationError::QuorumNotMet {
            voting_power,
            required: validator_set.quorum_voting_power(),
        });
    }

    Ok(voting_power)
}

/// Verifies quorum certificates against a known validator set.
///
/// Purely a signature check: staleness and epoch bookkeeping belong to the
/// caller. Generic over the hashing and aggregate-signature backends.
#[derive(Clone, Debug, Default)]
pub struct QuorumCertificateVerifier<H = Sha256Hasher, A = BlsAggregateVerifier> {
    hasher: H,
    aggregate: A,
}

impl<H: Hasher, A: AggregateVerifier> QuorumCertificateVerifier<H, A> {
    pub fn new(hasher: H, aggregate: A) -> Self {
        Self { hasher, aggregate }
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Check that `cert` carries at least a quorum of `validator_set`'s
    /// voting power and that the aggregate signature covers its record.
    pub fn verify(
        &self,
        cert: &QuorumCertificate,
        validator_set: &ValidatorSet,
    ) -> Result<(), VerificationError> {
        let voting_power = check_voting_power(validator_set, &cert.signer_bitmask)?;

        let signer_indices: Vec<usize> = cert.signer_bitmask.iter_ones().collect();
        let signers: Vec<&BlsPublicKey> = signer_indices
            .iter()
            .filter_map(|&i| validator_set.get(i))
            .map(|v| &v.public_key)
            .collect();

        let message = cert.signed_record.hash_with(&self.hasher);
        self.aggregate
            .verify_aggregate(message.as_ref(), &signers, &cert.aggregate_signature)
            .map_err(|e| match e {
                // Report the position in the validator set, not among signers
                VerificationError::InvalidPublicKey { index, reason } => {
                    VerificationError::InvalidPublicKey {
                        index: signer_indices.get(index).copied().unwrap_or(index),
                        reason,
                    }
                }
                other => other,
            })?;

        debug!(
            epoch = cert.epoch(),
            version = cert.version(),
            signers = signers.len(),
            voting_power = %voting_power,
            "quorum certificate verified"
        );
        Ok(())
    }
}

/// Verify `cert` against `validator_set` with the default SHA-256 / BLS backends.
pub fn verify_quorum_certificate(
    cert: &QuorumCertificate,
    validator_set: &ValidatorSet,
) -> Result<(), VerificationError> {
    QuorumCertificateVerifier::<Sha256Hasher, BlsAggregateVerifier>::default().verify(cert, validator_set)
}
