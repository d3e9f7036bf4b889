//! Deterministic fixtures for tests: BLS validator keys, certificate
//! builders, and in-memory provers for both Merkle structures.
//!
//! Only compiled for tests or with the `test-helpers` feature. Helpers here
//! panic on misuse; they are not part of the verification surface.

use crate::consensus::quorum::DST_BLS_SIG_IN_G2_WITH_POP;
use crate::proof::accumulator::{
    accumulator_height, covering_levels, frozen_levels, AccumulatorConsistencyProof, AccumulatorProof,
    AccumulatorRangeProof,
};
use crate::proof::sparse_merkle::{
    subtree_hash, SparseMerkleLeafNode, SparseMerkleProof, SparseMerkleRangeProof,
};
use crate::types::*;
use blst::min_pk::{AggregateSignature, SecretKey, Signature};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;

/// Deterministic RNG so fixtures are stable across runs.
pub fn rng(seed: u64) -> ChaCha20Rng {
    ChaCha20Rng::seed_from_u64(seed)
}

/// One validator's signing key.
pub struct ValidatorSigner {
    pub address: AccountAddress,
    secret_key: SecretKey,
    pub public_key: BlsPublicKey,
}

impl ValidatorSigner {
    pub fn generate(rng: &mut ChaCha20Rng) -> Self {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let secret_key = SecretKey::key_gen(&ikm, &[]).expect("32 bytes of ikm");
        let public_key = BlsPublicKey(secret_key.sk_to_pk().to_bytes());
        let mut address = [0u8; 32];
        rng.fill_bytes(&mut address);
        Self {
            address: AccountAddress(address),
            secret_key,
            public_key,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.secret_key.sign(message, DST_BLS_SIG_IN_G2_WITH_POP, &[])
    }
}

/// Aggregate individual signatures into the wire form.
pub fn aggregate_signatures(signatures: &[Signature]) -> BlsSignature {
    let refs: Vec<&Signature> = signatures.iter().collect();
    let aggregate = AggregateSignature::aggregate(&refs, false).expect("non-empty signature list");
    BlsSignature(aggregate.to_signature().to_bytes())
}

/// The signers of one epoch together with the public validator set.
pub struct ValidatorSigners {
    signers: Vec<ValidatorSigner>,
    validator_set: ValidatorSet,
}

impl ValidatorSigners {
    /// One signer per entry of `voting_powers`, keys derived from `seed`.
    pub fn new(seed: u64, voting_powers: &[u64]) -> Self {
        let mut rng = rng(seed);
        let signers: Vec<ValidatorSigner> = voting_powers
            .iter()
            .map(|_| ValidatorSigner::generate(&mut rng))
            .collect();
        let validators = signers
            .iter()
            .zip(voting_powers)
            .map(|(s, &power)| ValidatorInfo::new(s.address, s.public_key, power))
            .collect();
        let validator_set = ValidatorSet::new(validators).expect("valid fixture validator set");
        Self {
            signers,
            validator_set,
        }
    }

    pub fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Certificate over `record` signed by the validators at `indices`.
    pub fn certify(&self, record: SignedRecord, indices: &[usize]) -> QuorumCertificate {
        self.certify_with(&Sha256Hasher, record, indices)
    }

    pub fn certify_with<H: Hasher>(
        &self,
        hasher: &H,
        record: SignedRecord,
        indices: &[usize],
    ) -> QuorumCertificate {
        let message = record.hash_with(hasher);
        let signatures: Vec<Signature> = indices
            .iter()
            .map(|&i| self.signers[i].sign(message.as_ref()))
            .collect();
        QuorumCertificate::new(
            record,
            SignerBitmask::from_indices(self.len(), indices),
            aggregate_signatures(&signatures),
        )
    }

    pub fn certify_all(&self, record: SignedRecord) -> QuorumCertificate {
        let all: Vec<usize> = (0..self.len()).collect();
        self.certify(record, &all)
    }
}

/// A record with roots derived from its version.
pub fn record(epoch: u64, version: u64) -> SignedRecord {
    let h = Sha256Hasher;
    SignedRecord {
        epoch,
        version,
        state_root: h.digest(&[b"state", &version.to_le_bytes()]),
        accumulator_root: h.digest(&[b"accumulator", &version.to_le_bytes()]),
        timestamp_usecs: version * 1_000,
        next_validator_set: None,
    }
}

/// A simulated chain of epochs, each with a fresh validator set of equal
/// voting power.
pub struct ValidatorChain {
    seed: u64,
    size: usize,
    epoch: u64,
    current: ValidatorSigners,
    previous: Option<ValidatorSigners>,
}

impl ValidatorChain {
    pub fn new(seed: u64, size: usize) -> Self {
        Self::starting_at(seed, size, 1)
    }

    pub fn starting_at(seed: u64, size: usize, epoch: u64) -> Self {
        Self {
            seed,
            size,
            epoch,
            current: Self::signers_for(seed, size, epoch),
            previous: None,
        }
    }

    fn signers_for(seed: u64, size: usize, epoch: u64) -> ValidatorSigners {
        ValidatorSigners::new((seed << 20) | epoch, &vec![10; size])
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn epoch_state(&self) -> EpochState {
        EpochState::new(self.epoch, self.current.validator_set().clone())
    }

    pub fn signers(&self) -> &ValidatorSigners {
        &self.current
    }

    /// Signers of the epoch before the current one.
    pub fn previous_signers(&self) -> &ValidatorSigners {
        self.previous.as_ref().expect("no epoch has ended yet")
    }

    /// Certificate for a non-ending record in the current epoch.
    pub fn certify_in_epoch(&self, version: u64) -> QuorumCertificate {
        self.current.certify_all(record(self.epoch, version))
    }

    /// Certificate for an arbitrary record, signed by the current set.
    pub fn certify_record(&self, record: SignedRecord) -> QuorumCertificate {
        self.current.certify_all(record)
    }

    /// End the current epoch at `version` and move to the next set.
    pub fn end_epoch(&mut self, version: u64) -> QuorumCertificate {
        let all: Vec<usize> = (0..self.size).collect();
        self.end_epoch_with_signers(version, &all)
    }

    pub fn end_epoch_with_signers(&mut self, version: u64, indices: &[usize]) -> QuorumCertificate {
        let next = Self::signers_for(self.seed, self.size, self.epoch + 1);
        let mut ending = record(self.epoch, version);
        ending.next_validator_set = Some(next.validator_set().clone());
        let cert = self.current.certify(ending, indices);

        self.epoch += 1;
        self.previous = Some(std::mem::replace(&mut self.current, next));
        cert
    }
}

/// An append-only accumulator that can produce every proof kind.
pub struct InMemoryAccumulator<H> {
    hasher: H,
    /// `levels[0]` are the leaves; `levels[l][i]` is the node at height `l`.
    levels: Vec<Vec<HashValue>>,
}

impl<H: Hasher> InMemoryAccumulator<H> {
    pub fn new(hasher: H) -> Self {
        Self::from_leaves(hasher, Vec::new())
    }

    pub fn from_leaves(hasher: H, leaves: Vec<HashValue>) -> Self {
        let mut acc = Self {
            hasher,
            levels: vec![leaves],
        };
        acc.rebuild();
        acc
    }

    fn rebuild(&mut self) {
        self.levels.truncate(1);
        let height = accumulator_height(self.len());
        for level in 0..height {
            let below = &self.levels[level];
            let above: Vec<HashValue> = below
                .chunks(2)
                .map(|pair| {
                    let right = pair.get(1).unwrap_or(&ACCUMULATOR_PLACEHOLDER_HASH);
                    self.hasher.tagged(
                        tags::ACCUMULATOR_INTERNAL,
                        &[pair[0].as_ref(), right.as_ref()],
                    )
                })
                .collect();
            self.levels.push(above);
        }
    }

    pub fn append(&mut self, leaf: HashValue) {
        self.levels[0].push(leaf);
        self.rebuild();
    }

    pub fn len(&self) -> u64 {
        self.levels[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.levels[0].is_empty()
    }

    pub fn leaves(&self) -> &[HashValue] {
        &self.levels[0]
    }

    pub fn leaf(&self, index: u64) -> Option<HashValue> {
        self.levels[0].get(index as usize).copied()
    }

    fn node(&self, level: usize, index: u64) -> HashValue {
        self.levels
            .get(level)
            .and_then(|nodes| nodes.get(index as usize))
            .copied()
            .unwrap_or(ACCUMULATOR_PLACEHOLDER_HASH)
    }

    pub fn root(&self) -> HashValue {
        self.node(self.levels.len() - 1, 0)
    }

    pub fn inclusion_proof(&self, index: u64) -> Option<AccumulatorProof> {
        if index >= self.len() {
            return None;
        }
        let siblings = (0..accumulator_height(self.len()))
            .map(|level| self.node(level, (index >> level) ^ 1))
            .collect();
        Some(AccumulatorProof { siblings })
    }

    pub fn range_proof(&self, first: u64, count: u64) -> Option<AccumulatorRangeProof> {
        if count == 0 {
            return Some(AccumulatorRangeProof::default());
        }
        let last = first.checked_add(count - 1)?;
        if last >= self.len() {
            return None;
        }
        let mut proof = AccumulatorRangeProof::default();
        for level in 0..accumulator_height(self.len()) {
            let (lo, hi) = (first >> level, last >> level);
            if lo & 1 == 1 {
                proof.left_siblings.push(self.node(level, lo - 1));
            }
            if hi & 1 == 0 {
                proof.right_siblings.push(self.node(level, hi + 1));
            }
        }
        Some(proof)
    }

    pub fn consistency_proof(&self, old_count: u64) -> Option<AccumulatorConsistencyProof> {
        if old_count > self.len() {
            return None;
        }
        let mut subtree_roots = Vec::new();
        let mut pos = 0u64;
        for level in frozen_levels(old_count).chain(covering_levels(old_count, self.len())) {
            subtree_roots.push(self.node(level as usize, pos >> level));
            pos += 1u64 << level;
        }
        Some(AccumulatorConsistencyProof { subtree_roots })
    }
}

/// A sparse Merkle tree over `key -> value_hash` that can produce proofs.
pub struct InMemorySparseMerkleTree<H> {
    hasher: H,
    leaves: BTreeMap<HashValue, HashValue>,
}

impl<H: Hasher> InMemorySparseMerkleTree<H> {
    pub fn new(hasher: H) -> Self {
        Self {
            hasher,
            leaves: BTreeMap::new(),
        }
    }

    /// Insert `value` under `key`, storing its value hash.
    pub fn insert(&mut self, key: HashValue, value: &[u8]) {
        let value_hash = value_hash(&self.hasher, value);
        self.leaves.insert(key, value_hash);
    }

    pub fn insert_hash(&mut self, key: HashValue, value_hash: HashValue) {
        self.leaves.insert(key, value_hash);
    }

    pub fn remove(&mut self, key: &HashValue) -> Option<HashValue> {
        self.leaves.remove(key)
    }

    pub fn get(&self, key: &HashValue) -> Option<HashValue> {
        self.leaves.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// All leaves in ascending key order.
    pub fn leaves(&self) -> Vec<SparseMerkleLeafNode> {
        self.leaves
            .iter()
            .map(|(k, v)| SparseMerkleLeafNode::new(*k, *v))
            .collect()
    }

    pub fn root(&self) -> HashValue {
        subtree_hash(&self.hasher, &self.leaves(), 0)
    }

    /// Root of the subtree at `depth` on `key`'s path.
    pub fn subtree_root(&self, key: &HashValue, depth: usize) -> HashValue {
        let under: Vec<SparseMerkleLeafNode> = self
            .leaves()
            .into_iter()
            .filter(|leaf| leaf.key.common_prefix_bits_len(key) >= depth)
            .collect();
        subtree_hash(&self.hasher, &under, depth)
    }

    /// Inclusion proof if `key` is present, non-inclusion proof otherwise.
    pub fn proof(&self, key: &HashValue) -> SparseMerkleProof {
        let leaves = self.leaves();
        let mut slice = leaves.as_slice();
        let mut siblings = Vec::new();
        let mut depth = 0;
        let leaf = loop {
            match slice {
                [] => break None,
                [only] => break Some(*only),
                _ => {
                    let split = slice.partition_point(|leaf| !leaf.key.bit(depth));
                    let (left, right) = slice.split_at(split);
                    if key.bit(depth) {
                        siblings.push(subtree_hash(&self.hasher, left, depth + 1));
                        slice = right;
                    } else {
                        siblings.push(subtree_hash(&self.hasher, right, depth + 1));
                        slice = left;
                    }
                    depth += 1;
                }
            }
        };
        siblings.reverse();
        SparseMerkleProof { leaf, siblings }
    }

    /// Range proof for all leaves up to and including `rightmost`.
    pub fn range_proof(&self, rightmost: &HashValue) -> SparseMerkleRangeProof {
        let proof = self.proof(rightmost);
        let depth = proof.siblings.len();
        let right_siblings = proof
            .siblings
            .iter()
            .enumerate()
            .filter(|(i, _)| !rightmost.bit(depth - 1 - i))
            .map(|(_, sibling)| *sibling)
            .collect();
        SparseMerkleRangeProof { right_siblings }
    }
}
