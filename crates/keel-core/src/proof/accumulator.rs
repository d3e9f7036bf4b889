use crate::proof::{ensure_root, ProofError};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Maximum number of siblings in an accumulator proof. Leaf indices are
/// `u64`, so a tree of `2^63` leaves is the deepest we accept.
pub const MAX_ACCUMULATOR_PROOF_DEPTH: usize = 63;

/// Inclusion proof for one leaf. Siblings run from the leaf level up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorProof {
    pub siblings: Vec<HashValue>,
}

/// Inclusion proof for a contiguous run of leaves.
///
/// `left_siblings` are the subtrees immediately left of the run and
/// `right_siblings` those immediately right of it, each from the leaf level up.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorRangeProof {
    pub left_siblings: Vec<HashValue>,
    pub right_siblings: Vec<HashValue>,
}

/// Proof that one accumulator extends another.
///
/// The first `popcount(old_count)` roots are the old accumulator's frozen
/// subtrees, largest first. The rest are the roots of the aligned subtrees
/// that cover the appended leaves `[old_count, new_count)`, left to right.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorConsistencyProof {
    pub subtree_roots: Vec<HashValue>,
}

fn internal<H: Hasher>(hasher: &H, left: &HashValue, right: &HashValue) -> HashValue {
    hasher.tagged(tags::ACCUMULATOR_INTERNAL, &[left.as_ref(), right.as_ref()])
}

/// Verify that `leaf_hash` sits at `index` in the accumulator with `root`.
pub fn verify_inclusion<H: Hasher>(
    hasher: &H,
    root: HashValue,
    leaf_hash: HashValue,
    index: u64,
    proof: &AccumulatorProof,
) -> Result<(), ProofError> {
    let depth = proof.siblings.len();
    if depth > MAX_ACCUMULATOR_PROOF_DEPTH {
        return Err(ProofError::TooManySiblings {
            got: depth,
            max: MAX_ACCUMULATOR_PROOF_DEPTH,
        });
    }
    if index >> depth != 0 {
        return Err(ProofError::IndexOutOfRange { index, depth });
    }

    let (computed, _) = proof
        .siblings
        .iter()
        .fold((leaf_hash, index), |(hash, index), sibling| {
            let parent = if index & 1 == 0 {
                internal(hasher, &hash, sibling)
            } else {
                internal(hasher, sibling, &hash)
            };
            (parent, index >> 1)
        });

    ensure_root(computed, root)
}

/// Verify that `leaf_hashes` occupy `[first_index, first_index + len)` in the
/// accumulator with `root`.
///
/// Folds the whole run level by level, pairing neighbours and pulling a left
/// or right sibling at the edges. Equivalent to checking each leaf on its own.
pub fn verify_range<H: Hasher>(
    hasher: &H,
    root: HashValue,
    leaf_hashes: &[HashValue],
    first_index: u64,
    proof: &AccumulatorRangeProof,
) -> Result<(), ProofError> {
    if leaf_hashes.is_empty() {
        // Nothing is claimed, so nothing can be checked against `root`
        if !proof.left_siblings.is_empty() || !proof.right_siblings.is_empty() {
            return Err(ProofError::NonEmptySiblingsForEmptyRange);
        }
        return Ok(());
    }
    for siblings in [&proof.left_siblings, &proof.right_siblings] {
        if siblings.len() > MAX_ACCUMULATOR_PROOF_DEPTH {
            return Err(ProofError::TooManySiblings {
                got: siblings.len(),
                max: MAX_ACCUMULATOR_PROOF_DEPTH,
            });
        }
    }
    if first_index
        .checked_add(leaf_hashes.len() as u64 - 1)
        .is_none()
    {
        return Err(ProofError::RangeOverflow {
            first_index,
            count: leaf_hashes.len(),
        });
    }

    let mut left_siblings = proof.left_siblings.iter().peekable();
    let mut right_siblings = proof.right_siblings.iter().peekable();
    let mut first_pos = first_index;
    let mut current: Vec<HashValue> = leaf_hashes.to_vec();
    let mut parents: Vec<HashValue> = Vec::with_capacity(current.len() / 2 + 2);

    while current.len() > 1 || left_siblings.peek().is_some() || right_siblings.peek().is_some() {
        let mut children = current.as_slice();

        // First node is a right child: pair it with a left sibling
        if first_pos & 1 == 1 {
            let left = left_siblings
                .next()
                .ok_or(ProofError::MissingSibling { side: "left" })?;
            if let Some((first, rest)) = children.split_first() {
                parents.push(internal(hasher, left, first));
                children = rest;
            }
        }

        let mut pairs = children.chunks_exact(2);
        for pair in pairs.by_ref() {
            parents.push(internal(hasher, &pair[0], &pair[1]));
        }

        // Last node is a left child: pair it with a right sibling
        if let [last] = pairs.remainder() {
            let right = right_siblings
                .next()
                .ok_or(ProofError::MissingSibling { side: "right" })?;
            parents.push(internal(hasher, last, right));
        }

        first_pos >>= 1;
        current.clear();
        std::mem::swap(&mut current, &mut parents);
    }

    match current.first() {
        Some(computed) => ensure_root(*computed, root),
        None => Err(ProofError::MissingSibling { side: "left" }),
    }
}

/// Number of levels above the leaves in an accumulator of `count` leaves.
pub fn accumulator_height(count: u64) -> usize {
    if count <= 1 {
        0
    } else {
        (u64::BITS - (count - 1).leading_zeros()) as usize
    }
}

/// A complete subtree: `level` levels tall, its leftmost leaf at `start`.
#[derive(Clone, Copy, Debug)]
struct Subtree {
    start: u64,
    level: u32,
    hash: HashValue,
}

/// Levels of the frozen subtrees of an accumulator of `count` leaves,
/// largest first.
pub(crate) fn frozen_levels(count: u64) -> impl Iterator<Item = u32> {
    (0..u64::BITS).rev().filter(move |bit| count >> bit & 1 == 1)
}

/// Levels of the aligned subtrees covering `[from, to)`, left to right.
pub(crate) fn covering_levels(from: u64, to: u64) -> Vec<u32> {
    let mut levels = Vec::new();
    let mut pos = from;
    while pos < to {
        let mut level = if pos == 0 { u64::BITS - 1 } else { pos.trailing_zeros() };
        while (1u64 << level) > to - pos {
            level -= 1;
        }
        levels.push(level);
        pos += 1u64 << level;
    }
    levels
}

/// Root of an accumulator of `count` leaves given its frozen subtrees.
fn root_from_frozen<H: Hasher>(hasher: &H, frozen: &[Subtree], count: u64) -> HashValue {
    let Some((last, rest)) = frozen.split_last() else {
        return ACCUMULATOR_PLACEHOLDER_HASH;
    };

    // Climb from the rightmost subtree, padding with empty right halves
    let mut level = last.level;
    let mut hash = last.hash;
    for left in rest.iter().rev() {
        while level < left.level {
            hash = internal(hasher, &hash, &ACCUMULATOR_PLACEHOLDER_HASH);
            level += 1;
        }
        hash = internal(hasher, &left.hash, &hash);
        level += 1;
    }
    while (level as usize) < accumulator_height(count) {
        hash = internal(hasher, &hash, &ACCUMULATOR_PLACEHOLDER_HASH);
        level += 1;
    }
    hash
}

/// Merge adjacent sibling subtrees until only the frozen subtrees remain.
fn merge_to_frozen<H: Hasher>(hasher: &H, blocks: impl IntoIterator<Item = Subtree>) -> Vec<Subtree> {
    let mut stack: Vec<Subtree> = Vec::new();
    for block in blocks {
        stack.push(block);
        while let [.., left, right] = stack.as_slice() {
            let is_sibling_pair = left.level == right.level
                && left.level < u64::BITS - 1
                && (left.start >> left.level) & 1 == 0
                && left.start + (1u64 << left.level) == right.start;
            if !is_sibling_pair {
                break;
            }
            let merged = Subtree {
                start: left.start,
                level: left.level + 1,
                hash: internal(hasher, &left.hash, &right.hash),
            };
            stack.truncate(stack.len() - 2);
            stack.push(merged);
        }
    }
    stack
}

/// Verify that the accumulator with `new_root` and `new_count` leaves is an
/// append-only extension of the one with `old_root` and `old_count` leaves.
pub fn verify_consistency<H: Hasher>(
    hasher: &H,
    old_root: HashValue,
    old_count: u64,
    new_root: HashValue,
    new_count: u64,
    proof: &AccumulatorConsistencyProof,
) -> Result<(), ProofError> {
    if old_count > new_count {
        return Err(ProofError::ShrinkingAccumulator {
            old_count,
            new_count,
        });
    }

    let old_levels: Vec<u32> = frozen_levels(old_count).collect();
    let new_levels = covering_levels(old_count, new_count);
    let expected = old_levels.len() + new_levels.len();
    if proof.subtree_roots.len() != expected {
        return Err(ProofError::SubtreeCountMismatch {
            got: proof.subtree_roots.len(),
            expected,
        });
    }

    let mut start = 0u64;
    let blocks: Vec<Subtree> = old_levels
        .iter()
        .chain(new_levels.iter())
        .zip(&proof.subtree_roots)
        .map(|(&level, hash)| {
            let block = Subtree {
                start,
                level,
                hash: *hash,
            };
            start += 1u64 << level;
            block
        })
        .collect();
    // The old frozen subtrees must be exactly what the old root commits to
    let old_frozen = &blocks[..old_levels.len()];
    ensure_root(root_from_frozen(hasher, old_frozen, old_count), old_root)?;

    let new_frozen = merge_to_frozen(hasher, blocks.iter().copied());
    debug_assert_eq!(new_frozen.len(), new_count.count_ones() as usize);
    ensure_root(root_from_frozen(hasher, &new_frozen, new_count), new_root)
}

/// One leaf to check in [`verify_inclusion_batch`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionItem {
    pub leaf_hash: HashValue,
    pub index: u64,
    pub proof: AccumulatorProof,
}

/// Verify many inclusion proofs against one trusted root.
///
/// With the `parallel` feature and `parallel == true` the items are checked
/// on the rayon pool. Either way the reported failure is the first failing
/// item in input order.
pub fn verify_inclusion_batch<H: Hasher>(
    hasher: &H,
    root: HashValue,
    items: &[InclusionItem],
    parallel: bool,
) -> Result<(), ProofError> {
    let check = |item: &InclusionItem| verify_inclusion(hasher, root, item.leaf_hash, item.index, &item.proof);

    #[cfg(feature = "parallel")]
    let results: Vec<Result<(), ProofError>> = if parallel {
        use rayon::prelude::*;
        items.par_iter().map(check).collect()
    } else {
        items.iter().map(check).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<Result<(), ProofError>> = {
        let _ = parallel;
        items.iter().map(check).collect()
    };

    match results.into_iter().enumerate().find(|(_, r)| r.is_err()) {
        Some((position, Err(source))) => Err(ProofError::Batch {
            position,
            source: Box::new(source),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use crate::test_helpers::InMemoryAccumulator;

    fn leaves(n: u64) -> Vec<HashValue> {
        (0..n)
            .map(|i| accumulator_leaf_hash(&Sha256Hasher, &i.to_le_bytes()))
            .collect()
    }

    fn accumulator(n: u64) -> InMemoryAccumulator<Sha256Hasher> {
        InMemoryAccumulator::from_leaves(Sha256Hasher, leaves(n))
    }

    #[test]
    fn test_height() {
        assert_eq!(accumulator_height(0), 0);
        assert_eq!(accumulator_height(1), 0);
        assert_eq!(accumulator_height(2), 1);
        assert_eq!(accumulator_height(3), 2);
        assert_eq!(accumulator_height(4), 2);
        assert_eq!(accumulator_height(5), 3);
        assert_eq!(accumulator_height(u64::MAX), 64);
    }

    #[test]
    fn test_single_leaf_root_is_leaf() {
        let acc = accumulator(1);
        let leaf = acc.leaf(0).unwrap();
        assert_eq!(acc.root(), leaf);
        let proof = acc.inclusion_proof(0).unwrap();
        assert!(proof.siblings.is_empty());
        assert!(verify_inclusion(&Sha256Hasher, acc.root(), leaf, 0, &proof).is_ok());
    }

    #[test]
    fn test_three_leaf_layout() {
        let h = Sha256Hasher;
        let l = leaves(3);
        let expected = internal(
            &h,
            &internal(&h, &l[0], &l[1]),
            &internal(&h, &l[2], &ACCUMULATOR_PLACEHOLDER_HASH),
        );
        assert_eq!(accumulator(3).root(), expected);
        assert_eq!(accumulator(0).root(), ACCUMULATOR_PLACEHOLDER_HASH);
    }

    #[test]
    fn test_inclusion_every_leaf() {
        for n in [1u64, 2, 3, 5, 8, 13] {
            let acc = accumulator(n);
            for i in 0..n {
                let proof = acc.inclusion_proof(i).unwrap();
                verify_inclusion(&Sha256Hasher, acc.root(), acc.leaf(i).unwrap(), i, &proof).unwrap();
            }
        }
    }

    #[test]
    fn test_inclusion_wrong_index_or_leaf() {
        let acc = accumulator(7);
        let proof = acc.inclusion_proof(2).unwrap();
        let leaf = acc.leaf(2).unwrap();
        assert!(matches!(
            verify_inclusion(&Sha256Hasher, acc.root(), leaf, 3, &proof),
            Err(ProofError::RootMismatch { .. })
        ));
        let err = verify_inclusion(&Sha256Hasher, acc.root(), acc.leaf(3).unwrap(), 2, &proof).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProofMismatch);
        assert!(matches!(
            verify_inclusion(&Sha256Hasher, acc.root(), leaf, 2 + 8, &proof),
            Err(ProofError::IndexOutOfRange { depth: 3, .. })
        ));
    }

    #[test]
    fn test_inclusion_tampered_sibling() {
        let acc = accumulator(9);
        let mut proof = acc.inclusion_proof(4).unwrap();
        let mut bytes = *proof.siblings[1].as_bytes();
        bytes[31] ^= 0x80;
        proof.siblings[1] = HashValue::new(bytes);
        assert!(verify_inclusion(&Sha256Hasher, acc.root(), acc.leaf(4).unwrap(), 4, &proof).is_err());
    }

    #[test]
    fn test_inclusion_rejects_oversized_proof() {
        let proof = AccumulatorProof {
            siblings: vec![HashValue::zero(); MAX_ACCUMULATOR_PROOF_DEPTH + 1],
        };
        let err = verify_inclusion(&Sha256Hasher, HashValue::zero(), HashValue::zero(), 0, &proof).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEncoding);
    }

    #[test]
    fn test_range_every_span() {
        for n in [1u64, 2, 3, 6, 11] {
            let acc = accumulator(n);
            for first in 0..n {
                for last in first..n {
                    let proof = acc.range_proof(first, last - first + 1).unwrap();
                    let span = &acc.leaves()[first as usize..=last as usize];
                    verify_range(&Sha256Hasher, acc.root(), span, first, &proof)
                        .unwrap_or_else(|e| panic!("n={} [{}, {}]: {}", n, first, last, e));
                }
            }
        }
    }

    #[test]
    fn test_range_rejects_shifted_span() {
        let acc = accumulator(10);
        let proof = acc.range_proof(3, 4).unwrap();
        let span = &acc.leaves()[3..7];
        assert!(verify_range(&Sha256Hasher, acc.root(), span, 4, &proof).is_err());
        assert!(verify_range(&Sha256Hasher, acc.root(), &span[..3], 3, &proof).is_err());
    }

    #[test]
    fn test_empty_range() {
        let acc = accumulator(4);
        assert!(verify_range(&Sha256Hasher, acc.root(), &[], 0, &AccumulatorRangeProof::default()).is_ok());
        let proof = AccumulatorRangeProof {
            left_siblings: vec![HashValue::zero()],
            right_siblings: vec![],
        };
        assert_eq!(
            verify_range(&Sha256Hasher, acc.root(), &[], 0, &proof),
            Err(ProofError::NonEmptySiblingsForEmptyRange)
        );
    }

    #[test]
    fn test_range_overflow() {
        let leaves = leaves(2);
        let err = verify_range(
            &Sha256Hasher,
            HashValue::zero(),
            &leaves,
            u64::MAX,
            &AccumulatorRangeProof::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ProofError::RangeOverflow { .. }));
    }

    #[test]
    fn test_consistency_all_pairs() {
        let full = accumulator(13);
        for old in 0..=13u64 {
            for new in old..=13u64 {
                let old_acc = InMemoryAccumulator::from_leaves(Sha256Hasher, full.leaves()[..old as usize].to_vec());
                let new_acc = InMemoryAccumulator::from_leaves(Sha256Hasher, full.leaves()[..new as usize].to_vec());
                let proof = new_acc.consistency_proof(old).unwrap();
                verify_consistency(&Sha256Hasher, old_acc.root(), old, new_acc.root(), new, &proof)
                    .unwrap_or_else(|e| panic!("{} -> {}: {}", old, new, e));
            }
        }
    }

    #[test]
    fn test_consistency_rejects_rewritten_history() {
        let honest = accumulator(6);
        let mut forked_leaves = leaves(10);
        forked_leaves[2] = accumulator_leaf_hash(&Sha256Hasher, b"rewritten");
        let forked = InMemoryAccumulator::from_leaves(Sha256Hasher, forked_leaves);
        let proof = forked.consistency_proof(6).unwrap();
        let err = verify_consistency(&Sha256Hasher, honest.root(), 6, forked.root(), 10, &proof).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProofMismatch);
    }

    #[test]
    fn test_consistency_structural_errors() {
        let acc = accumulator(5);
        let proof = acc.consistency_proof(3).unwrap();
        assert!(matches!(
            verify_consistency(&Sha256Hasher, acc.root(), 5, acc.root(), 3, &proof),
            Err(ProofError::ShrinkingAccumulator { .. })
        ));
        let mut short = proof.clone();
        short.subtree_roots.pop();
        assert!(matches!(
            verify_consistency(&Sha256Hasher, HashValue::zero(), 3, acc.root(), 5, &short),
            Err(ProofError::SubtreeCountMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_reports_first_failure() {
        let acc = accumulator(16);
        let mut items: Vec<InclusionItem> = (0..16)
            .map(|i| InclusionItem {
                leaf_hash: acc.leaf(i).unwrap(),
                index: i,
                proof: acc.inclusion_proof(i).unwrap(),
            })
            .collect();
        assert!(verify_inclusion_batch(&Sha256Hasher, acc.root(), &items, true).is_ok());
        assert!(verify_inclusion_batch(&Sha256Hasher, acc.root(), &items, false).is_ok());

        items[11].index = 12;
        items[5].leaf_hash = HashValue::zero();
        for parallel in [false, true] {
            let err = verify_inclusion_batch(&Sha256Hasher, acc.root(), &items, parallel).unwrap_err();
            assert!(matches!(err, ProofError::Batch { position: 5, .. }));
            assert_eq!(err.kind(), ErrorKind::ProofMismatch);
        }
    }
}
