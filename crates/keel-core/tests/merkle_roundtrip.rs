use keel_core::proof::{accumulator, sparse_merkle, ProofError, SparseMerkleProof};
use keel_core::test_helpers::{InMemoryAccumulator, InMemorySparseMerkleTree};
use keel_core::types::*;
use keel_core::{Classify, ErrorKind};
use proptest::prelude::*;

fn make_leaves(count: usize) -> Vec<HashValue> {
    (0..count as u64)
        .map(|i| accumulator_leaf_hash(&Sha256Hasher, &i.to_le_bytes()))
        .collect()
}

fn key(i: u64) -> HashValue {
    Sha256Hasher.digest(&[b"key", &i.to_le_bytes()])
}

fn flip_bit(hash: HashValue, bit: usize) -> HashValue {
    let mut bytes = *hash.as_bytes();
    bytes[bit / 8] ^= 0x80 >> (bit % 8);
    HashValue::new(bytes)
}

#[test]
fn accumulator_seven_leaves_every_index() {
    let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(7));
    for index in 0..7 {
        let proof = acc.inclusion_proof(index).unwrap();
        assert_eq!(proof.siblings.len(), 3);
        accumulator::verify_inclusion(&Sha256Hasher, acc.root(), acc.leaf(index).unwrap(), index, &proof)
            .unwrap();
    }
}

#[test]
fn accumulator_wrong_root_is_proof_mismatch() {
    let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(5));
    let other = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(6));
    let proof = acc.inclusion_proof(2).unwrap();
    let err = accumulator::verify_inclusion(&Sha256Hasher, other.root(), acc.leaf(2).unwrap(), 2, &proof)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProofMismatch);
}

#[test]
fn sparse_merkle_inclusion_and_absence() {
    let mut tree = InMemorySparseMerkleTree::new(Sha256Hasher);
    for i in 0..20 {
        tree.insert(key(i), format!("value-{i}").as_bytes());
    }
    let root = tree.root();

    let present = key(7);
    let proof = tree.proof(&present);
    sparse_merkle::verify(&Sha256Hasher, root, present, tree.get(&present), &proof).unwrap();

    let absent = key(1_000);
    let proof = tree.proof(&absent);
    sparse_merkle::verify(&Sha256Hasher, root, absent, None, &proof).unwrap();

    // Absence cannot be passed off as a value
    let err = sparse_merkle::verify(&Sha256Hasher, root, absent, Some(key(0)), &proof).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProofMismatch);
}

#[test]
fn sparse_merkle_partial_matches_full() {
    let mut tree = InMemorySparseMerkleTree::new(Sha256Hasher);
    for i in 0..64 {
        tree.insert(key(i), &i.to_le_bytes());
    }
    let target = key(33);
    let full = tree.proof(&target);
    for root_depth in 0..full.siblings.len() {
        let partial = SparseMerkleProof {
            leaf: full.leaf,
            siblings: full.siblings[..full.siblings.len() - root_depth].to_vec(),
        };
        sparse_merkle::verify_partial(
            &Sha256Hasher,
            tree.subtree_root(&target, root_depth),
            target,
            tree.get(&target),
            &partial,
            root_depth,
        )
        .unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn accumulator_inclusion_roundtrip(count in 1usize..200, seed in any::<u64>()) {
        let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(count));
        let index = seed % count as u64;
        let proof = acc.inclusion_proof(index).unwrap();
        prop_assert!(accumulator::verify_inclusion(
            &Sha256Hasher, acc.root(), acc.leaf(index).unwrap(), index, &proof
        ).is_ok());
    }

    #[test]
    fn accumulator_tampered_sibling_rejected(count in 2usize..200, seed in any::<u64>(), bit in 0usize..256) {
        let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(count));
        let index = seed % count as u64;
        let mut proof = acc.inclusion_proof(index).unwrap();
        let at = (seed as usize / count) % proof.siblings.len();
        proof.siblings[at] = flip_bit(proof.siblings[at], bit);
        let result = accumulator::verify_inclusion(
            &Sha256Hasher, acc.root(), acc.leaf(index).unwrap(), index, &proof
        );
        prop_assert!(
            matches!(result, Err(ProofError::RootMismatch { .. })),
            "expected root mismatch"
        );
    }

    #[test]
    fn accumulator_wrong_index_rejected(count in 2usize..200, seed in any::<u64>()) {
        let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(count));
        let index = seed % count as u64;
        let other = (index + 1) % count as u64;
        let proof = acc.inclusion_proof(index).unwrap();
        prop_assert!(accumulator::verify_inclusion(
            &Sha256Hasher, acc.root(), acc.leaf(index).unwrap(), other, &proof
        ).is_err());
    }

    #[test]
    fn accumulator_range_matches_per_leaf(count in 1usize..150, a in any::<u64>(), b in any::<u64>()) {
        let acc = InMemoryAccumulator::from_leaves(Sha256Hasher, make_leaves(count));
        let first = a % count as u64;
        let len = 1 + b % (count as u64 - first);
        let proof = acc.range_proof(first, len).unwrap();
        let range = &acc.leaves()[first as usize..(first + len) as usize];
        prop_assert!(accumulator::verify_range(&Sha256Hasher, acc.root(), range, first, &proof).is_ok());
        for (offset, leaf) in range.iter().enumerate() {
            let index = first + offset as u64;
            let single = acc.inclusion_proof(index).unwrap();
            prop_assert!(accumulator::verify_inclusion(&Sha256Hasher, acc.root(), *leaf, index, &single).is_ok());
        }

        // Swapping in a foreign leaf breaks the range
        let mut tampered = range.to_vec();
        tampered[0] = accumulator_leaf_hash(&Sha256Hasher, b"foreign");
        prop_assert!(accumulator::verify_range(&Sha256Hasher, acc.root(), &tampered, first, &proof).is_err());
    }

    #[test]
    fn accumulator_consistency_roundtrip(old in 0usize..130, extra in 0usize..130) {
        let leaves = make_leaves(old + extra);
        let before = InMemoryAccumulator::from_leaves(Sha256Hasher, leaves[..old].to_vec());
        let after = InMemoryAccumulator::from_leaves(Sha256Hasher, leaves);
        let proof = after.consistency_proof(old as u64).unwrap();
        prop_assert!(accumulator::verify_consistency(
            &Sha256Hasher,
            before.root(),
            old as u64,
            after.root(),
            after.len(),
            &proof,
        ).is_ok());
    }

    #[test]
    fn accumulator_consistency_detects_rewrite(old in 1usize..100, extra in 1usize..100, seed in any::<u64>()) {
        let leaves = make_leaves(old + extra);
        let before = InMemoryAccumulator::from_leaves(Sha256Hasher, leaves[..old].to_vec());

        // Rewrite one historical leaf in the new accumulator
        let mut rewritten = leaves;
        let victim = (seed % old as u64) as usize;
        rewritten[victim] = accumulator_leaf_hash(&Sha256Hasher, b"rewritten");
        let after = InMemoryAccumulator::from_leaves(Sha256Hasher, rewritten);

        let proof = after.consistency_proof(old as u64).unwrap();
        let result = accumulator::verify_consistency(
            &Sha256Hasher,
            before.root(),
            old as u64,
            after.root(),
            after.len(),
            &proof,
        );
        prop_assert!(result.is_err());
    }

    #[test]
    fn sparse_merkle_roundtrip(ids in prop::collection::btree_set(any::<u64>(), 1..64), lookup in any::<u64>()) {
        let mut tree = InMemorySparseMerkleTree::new(Sha256Hasher);
        for id in &ids {
            tree.insert(key(*id), &id.to_be_bytes());
        }
        let root = tree.root();

        for id in &ids {
            let k = key(*id);
            let proof = tree.proof(&k);
            prop_assert!(sparse_merkle::verify(&Sha256Hasher, root, k, tree.get(&k), &proof).is_ok());
        }

        if !ids.contains(&lookup) {
            let k = key(lookup);
            let proof = tree.proof(&k);
            prop_assert!(sparse_merkle::verify(&Sha256Hasher, root, k, None, &proof).is_ok());
        }
    }

    #[test]
    fn sparse_merkle_tampered_sibling_rejected(
        ids in prop::collection::btree_set(any::<u64>(), 2..64),
        pick in any::<prop::sample::Index>(),
        bit in 0usize..256,
    ) {
        let mut tree = InMemorySparseMerkleTree::new(Sha256Hasher);
        for id in &ids {
            tree.insert(key(*id), &id.to_be_bytes());
        }
        let ids: Vec<u64> = ids.into_iter().collect();
        let k = key(*pick.get(&ids));
        let mut proof = tree.proof(&k);
        prop_assume!(!proof.siblings.is_empty());
        let at = bit % proof.siblings.len();
        proof.siblings[at] = flip_bit(proof.siblings[at], bit);
        prop_assert!(sparse_merkle::verify(&Sha256Hasher, tree.root(), k, tree.get(&k), &proof).is_err());
    }

    #[test]
    fn sparse_merkle_range_roundtrip(ids in prop::collection::btree_set(any::<u64>(), 1..48), cut in any::<prop::sample::Index>()) {
        let mut tree = InMemorySparseMerkleTree::new(Sha256Hasher);
        for id in &ids {
            tree.insert(key(*id), &id.to_le_bytes());
        }
        let leaves = tree.leaves();
        let end = cut.index(leaves.len()) + 1;
        let known = &leaves[..end];
        let proof = tree.range_proof(&known[end - 1].key);
        prop_assert!(sparse_merkle::verify_range(&Sha256Hasher, tree.root(), known, &proof).is_ok());

        // Dropping a known leaf from the middle of the run is detected
        if end >= 2 {
            let mut partial = known.to_vec();
            partial.remove(0);
            prop_assert!(sparse_merkle::verify_range(&Sha256Hasher, tree.root(), &partial, &proof).is_err());
        }
    }
}
