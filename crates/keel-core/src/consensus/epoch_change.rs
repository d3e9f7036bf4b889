use crate::consensus::quorum::{AggregateVerifier, QuorumCertificateVerifier, VerificationError};
use crate::consensus::waypoint::Waypoint;
use crate::error::{Classify, ErrorKind};
use crate::types::*;
use tracing::debug;

/// Where an epoch-change walk starts from.
#[derive(Clone, Copy, Debug)]
pub enum EpochAnchor<'a> {
    /// Bootstrap: the first non-stale certificate must be exactly the
    /// waypoint's record. Its signatures are not checked, the waypoint is the
    /// root of trust.
    Waypoint(&'a Waypoint),
    /// Operational: the first non-stale certificate must be signed by this
    /// epoch's validator set.
    EpochState(&'a EpochState),
}

/// Result of walking an epoch-change chain.
#[derive(Clone, Debug)]
pub struct VerifiedEpochChange<'p> {
    /// Validator set handed over by the last certificate in the chain, or
    /// the anchor's own set when every certificate was stale.
    pub epoch_state: EpochState,
    /// The last certificate accepted from the chain, `None` if the chain
    /// carried nothing past the anchor.
    pub last_certificate: Option<&'p QuorumCertificate>,
}

fn broken(reason: String) -> VerificationError {
    VerificationError::InvalidEpochChangeProof(reason)
}

/// Walk `proof` from `anchor`, re-deriving each epoch's validator set from
/// the previous verified record.
///
/// Certificates older than the anchor are skipped so that re-delivered
/// prefixes are harmless; a chain that is stale throughout hands back the
/// anchor's epoch state. A waypoint anchor has no epoch state, so there the
/// chain must reach the waypoint's record. Every other certificate must be for exactly the
/// current epoch, newer than the one before it, signed by the current set,
/// and must carry the next set. An epoch gap is never skipped over.
pub fn verify_epoch_changes<'p, H: Hasher, A: AggregateVerifier>(
    verifier: &QuorumCertificateVerifier<H, A>,
    anchor: EpochAnchor<'_>,
    proof: &'p EpochChangeProof,
) -> Result<VerifiedEpochChange<'p>, VerificationError> {
    if proof.is_empty() {
        return Err(broken("Empty epoch change proof".into()));
    }

    let mut current: Option<EpochState> = match anchor {
        EpochAnchor::Waypoint(_) => None,
        EpochAnchor::EpochState(state) => Some(state.clone()),
    };
    let mut last: Option<&'p QuorumCertificate> = None;

    for cert in &proof.certificates {
        match (&current, last) {
            (None, _) => {
                let EpochAnchor::Waypoint(waypoint) = anchor else {
                    return Err(broken("Epoch change walk lost its anchor".into()));
                };
                if cert.version() < waypoint.version() {
                    debug!(version = cert.version(), "skipping certificate older than waypoint");
                    continue;
                }
                if !waypoint.matches_with(&cert.signed_record, verifier.hasher()) {
                    return Err(VerificationError::WaypointMismatch {
                        version: cert.version(),
                    });
                }
            }
            (Some(state), prev) => {
                if prev.is_none() && cert.epoch() < state.epoch {
                    debug!(epoch = cert.epoch(), trusted_epoch = state.epoch, "skipping stale certificate");
                    continue;
                }
                if cert.epoch() != state.epoch {
                    return Err(broken(format!(
                        "Expected a certificate for epoch {}, got epoch {}",
                        state.epoch,
                        cert.epoch()
                    )));
                }
                if let Some(prev) = prev {
                    if cert.version() <= prev.version() {
                        return Err(broken(format!(
                            "Certificate version {} does not advance past {}",
                            cert.version(),
                            prev.version()
                        )));
                    }
                }
                // Malformed certificates keep their kind, everything else
                // means the chain itself is broken
                verifier.verify(cert, &state.validator_set).map_err(|e| match e.kind() {
                    ErrorKind::MalformedEncoding | ErrorKind::InvalidEpochChangeProof => e,
                    _ => broken(format!("Epoch {} certificate rejected: {}", state.epoch, e)),
                })?;
            }
        }

        let next = cert.signed_record.next_epoch_state().ok_or_else(|| {
            broken(format!(
                "Certificate at version {} does not end epoch {}",
                cert.version(),
                cert.epoch()
            ))
        })?;
        debug!(
            from_epoch = cert.epoch(),
            to_epoch = next.epoch,
            version = cert.version(),
            validators = next.validator_set.len(),
            "epoch change verified"
        );
        current = Some(next);
        last = Some(cert);
    }

    match current {
        Some(epoch_state) => Ok(VerifiedEpochChange {
            epoch_state,
            last_certificate: last,
        }),
        None => Err(broken("Epoch change proof ends before the waypoint".into())),
    }
}

impl EpochChangeProof {
    /// Verify this chain starting from `starting` with the default backends
    /// and return the validator set it hands over to.
    pub fn verify(&self, starting: &EpochState) -> Result<EpochState, VerificationError> {
        let verifier = QuorumCertificateVerifier::<Sha256Hasher>::default();
        verify_epoch_changes(&verifier, EpochAnchor::EpochState(starting), self)
            .map(|change| change.epoch_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use crate::test_helpers::*;

    #[test]
    fn test_single_epoch_change() {
        let mut chain = ValidatorChain::new(21, 4);
        let start = chain.epoch_state();
        let cert = chain.end_epoch(100);

        let proof = EpochChangeProof::new(vec![cert], false);
        let next = proof.verify(&start).unwrap();
        assert_eq!(next, chain.epoch_state());
        assert_eq!(next.epoch, start.epoch + 1);
    }

    #[test]
    fn test_multi_epoch_chain() {
        let mut chain = ValidatorChain::new(22, 4);
        let start = chain.epoch_state();
        let certs: Vec<_> = (1..=4).map(|i| chain.end_epoch(i * 100)).collect();

        let next = EpochChangeProof::new(certs, false).verify(&start).unwrap();
        assert_eq!(next.epoch, start.epoch + 4);
        assert_eq!(next, chain.epoch_state());
    }

    #[test]
    fn test_stale_prefix_skipped() {
        let mut chain = ValidatorChain::new(23, 4);
        let genesis = chain.epoch_state();
        let first = chain.end_epoch(100);
        let middle = chain.epoch_state();
        let second = chain.end_epoch(200);

        let proof = EpochChangeProof::new(vec![first, second], false);
        assert_eq!(proof.verify(&middle).unwrap(), chain.epoch_state());
        assert_eq!(proof.verify(&genesis).unwrap(), chain.epoch_state());
    }

    #[test]
    fn test_all_stale_returns_anchor() {
        let mut chain = ValidatorChain::new(24, 4);
        let first = chain.end_epoch(100);
        let trusted = chain.epoch_state();
        let proof = EpochChangeProof::new(vec![first], true);

        let verifier = QuorumCertificateVerifier::<Sha256Hasher>::default();
        let change = verify_epoch_changes(&verifier, EpochAnchor::EpochState(&trusted), &proof).unwrap();
        assert_eq!(change.epoch_state, trusted);
        assert!(change.last_certificate.is_none());
        assert_eq!(proof.verify(&trusted).unwrap(), trusted);
    }

    #[test]
    fn test_chain_ending_before_waypoint_rejected() {
        let mut chain = ValidatorChain::new(35, 4);
        let early = chain.end_epoch(50);
        let genesis_end = chain.end_epoch(100);
        let waypoint = Waypoint::new(&genesis_end.signed_record);

        let verifier = QuorumCertificateVerifier::<Sha256Hasher>::default();
        let proof = EpochChangeProof::new(vec![early], false);
        let err = verify_epoch_changes(&verifier, EpochAnchor::Waypoint(&waypoint), &proof).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEpochChangeProof);
    }

    #[test]
    fn test_malformed_bitmask_in_chain_keeps_kind() {
        let mut chain = ValidatorChain::new(36, 4);
        let start = chain.epoch_state();
        let mut cert = chain.end_epoch(100);
        cert.signer_bitmask = SignerBitmask::from_indices(5, &[0, 1, 2, 3]);

        let err = EpochChangeProof::new(vec![cert], false).verify(&start).unwrap_err();
        assert!(matches!(err, VerificationError::BitmaskLengthMismatch { got: 5, expected: 4 }));
        assert_eq!(err.kind(), ErrorKind::MalformedEncoding);
        assert!(!err.kind().is_attack_signal());
    }

    #[test]
    fn test_empty_proof_rejected() {
        let chain = ValidatorChain::new(25, 4);
        let err = EpochChangeProof::default().verify(&chain.epoch_state()).unwrap_err();
        assert!(matches!(err, VerificationError::InvalidEpochChangeProof(_)));
    }

    #[test]
    fn test_epoch_gap_rejected() {
        let mut chain = ValidatorChain::new(26, 4);
        let start = chain.epoch_state();
        let first = chain.end_epoch(100);
        let _skipped = chain.end_epoch(200);
        let third = chain.end_epoch(300);

        for has_more in [false, true] {
            let proof = EpochChangeProof::new(vec![first.clone(), third.clone()], has_more);
            let err = proof.verify(&start).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidEpochChangeProof);
        }
    }

    #[test]
    fn test_certificate_without_next_set_rejected() {
        let chain = ValidatorChain::new(27, 4);
        let start = chain.epoch_state();
        let cert = chain.certify_in_epoch(50);
        let err = EpochChangeProof::new(vec![cert], false).verify(&start).unwrap_err();
        assert!(matches!(err, VerificationError::InvalidEpochChangeProof(_)));
    }

    #[test]
    fn test_unauthorized_second_set_rejected() {
        // Second certificate is internally valid but signed by a set the first
        // record never handed over to.
        let mut chain = ValidatorChain::new(28, 4);
        let start = chain.epoch_state();
        let first = chain.end_epoch(100);

        let mut rogue = ValidatorChain::starting_at(29, 4, chain.epoch_state().epoch);
        let forged = rogue.end_epoch(200);
        let rogue_set = rogue.previous_signers().validator_set();
        assert!(crate::consensus::quorum::verify_quorum_certificate(&forged, rogue_set).is_ok());

        let err = EpochChangeProof::new(vec![first, forged], false)
            .verify(&start)
            .unwrap_err();
        assert!(err.kind().is_attack_signal());
    }

    #[test]
    fn test_non_increasing_versions_rejected() {
        let mut chain = ValidatorChain::new(30, 4);
        let start = chain.epoch_state();
        let first = chain.end_epoch(100);
        let second = chain.end_epoch(100);
        let err = EpochChangeProof::new(vec![first, second], false)
            .verify(&start)
            .unwrap_err();
        assert!(matches!(err, VerificationError::InvalidEpochChangeProof(_)));
    }

    #[test]
    fn test_quorum_failure_in_chain_is_chain_error() {
        let mut chain = ValidatorChain::new(31, 4);
        let start = chain.epoch_state();
        let weak = chain.end_epoch_with_signers(100, &[0, 1]);
        let err = EpochChangeProof::new(vec![weak], false).verify(&start).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidEpochChangeProof);
    }

    #[test]
    fn test_waypoint_anchor() {
        let mut chain = ValidatorChain::new(32, 4);
        let pre = chain.end_epoch(50);
        let genesis_end = chain.end_epoch(100);
        let waypoint = Waypoint::new(&genesis_end.signed_record);
        let after = chain.end_epoch(200);

        let verifier = QuorumCertificateVerifier::<Sha256Hasher>::default();
        let proof = EpochChangeProof::new(vec![pre, genesis_end, after.clone()], false);
        let change = verify_epoch_changes(&verifier, EpochAnchor::Waypoint(&waypoint), &proof).unwrap();
        assert_eq!(change.epoch_state, chain.epoch_state());
        assert_eq!(change.last_certificate, Some(&after));
    }

    #[test]
    fn test_waypoint_anchor_rejects_substituted_record() {
        let mut chain = ValidatorChain::new(33, 4);
        let genesis_end = chain.end_epoch(100);
        let waypoint = Waypoint::new(&genesis_end.signed_record);

        let mut other = ValidatorChain::new(34, 4);
        let substitute = other.end_epoch(100);

        let verifier = QuorumCertificateVerifier::<Sha256Hasher>::default();
        let proof = EpochChangeProof::new(vec![substitute], false);
        let err = verify_epoch_changes(&verifier, EpochAnchor::Waypoint(&waypoint), &proof).unwrap_err();
        assert!(matches!(err, VerificationError::WaypointMismatch { version: 100 }));
    }
}
