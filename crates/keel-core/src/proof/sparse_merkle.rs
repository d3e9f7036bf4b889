use crate::proof::{ensure_root, ProofError};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// A sparse Merkle proof never has more siblings than there are key bits.
pub const MAX_SPARSE_MERKLE_PROOF_DEPTH: usize = HASH_LENGTH_IN_BITS;

/// A leaf of the state tree: the hashed key and the hash of its value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SparseMerkleLeafNode {
    pub key: HashValue,
    pub value_hash: HashValue,
}

impl SparseMerkleLeafNode {
    pub fn new(key: HashValue, value_hash: HashValue) -> Self {
        Self { key, value_hash }
    }

    pub fn hash_with<H: Hasher>(&self, hasher: &H) -> HashValue {
        hasher.tagged(
            tags::SPARSE_MERKLE_LEAF,
            &[self.key.as_ref(), self.value_hash.as_ref()],
        )
    }
}

/// Inclusion or non-inclusion proof for one key.
///
/// A subtree holding a single leaf is stored as that leaf, so `leaf` sits at
/// depth `siblings.len()`. For non-inclusion, `leaf` is either `None` (an
/// empty subtree on the key's path) or another key's leaf occupying the
/// subtree the key would fall into.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseMerkleProof {
    pub leaf: Option<SparseMerkleLeafNode>,
    /// From the leaf level up.
    pub siblings: Vec<HashValue>,
}

/// Proof that a sorted run of known leaves is the complete leaf set left of
/// (and including) its rightmost key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseMerkleRangeProof {
    /// Right-hand siblings on the rightmost known key's path, leaf level up.
    pub right_siblings: Vec<HashValue>,
}

fn internal<H: Hasher>(hasher: &H, left: &HashValue, right: &HashValue) -> HashValue {
    hasher.tagged(tags::SPARSE_MERKLE_INTERNAL, &[left.as_ref(), right.as_ref()])
}

/// Verify `proof` for `key` against the full-tree `root`.
///
/// `Some(value_hash)` proves the key maps to that value, `None` proves the
/// key is absent.
pub fn verify<H: Hasher>(
    hasher: &H,
    root: HashValue,
    key: HashValue,
    value_hash: Option<HashValue>,
    proof: &SparseMerkleProof,
) -> Result<(), ProofError> {
    verify_partial(hasher, root, key, value_hash, proof, 0)
}

/// Like [`verify`], but `root` is the subtree at `root_depth` on the key's
/// path, so the proof consumes key bits `root_depth..root_depth + siblings`.
pub fn verify_partial<H: Hasher>(
    hasher: &H,
    root: HashValue,
    key: HashValue,
    value_hash: Option<HashValue>,
    proof: &SparseMerkleProof,
    root_depth: usize,
) -> Result<(), ProofError> {
    let len = proof.siblings.len();
    if len > MAX_SPARSE_MERKLE_PROOF_DEPTH {
        return Err(ProofError::TooManySiblings {
            got: len,
            max: MAX_SPARSE_MERKLE_PROOF_DEPTH,
        });
    }
    let leaf_depth = root_depth
        .checked_add(len)
        .filter(|depth| *depth <= HASH_LENGTH_IN_BITS)
        .ok_or(ProofError::InvalidRootDepth {
            root_depth,
            siblings: len,
        })?;

    match (value_hash, &proof.leaf) {
        (Some(value_hash), Some(leaf)) => {
            if leaf.key != key {
                return Err(ProofError::KeyMismatch {
                    key,
                    proof_key: leaf.key,
                });
            }
            if leaf.value_hash != value_hash {
                return Err(ProofError::ValueMismatch {
                    key,
                    proof_value_hash: leaf.value_hash,
                });
            }
        }
        (Some(_), None) => return Err(ProofError::ExpectedInclusion { key }),
        (None, Some(leaf)) => {
            if leaf.key == key {
                return Err(ProofError::ExpectedNonInclusion { key });
            }
            // The other leaf must own the whole subtree the key would land in
            let common_prefix = key.common_prefix_bits_len(&leaf.key);
            if common_prefix < leaf_depth {
                return Err(ProofError::LeafTooDeep {
                    key,
                    leaf_key: leaf.key,
                    common_prefix,
                    depth: leaf_depth,
                });
            }
        }
        (None, None) => {}
    }

    let leaf_hash = proof
        .leaf
        .map_or(SPARSE_MERKLE_PLACEHOLDER_HASH, |leaf| leaf.hash_with(hasher));

    let computed = proof
        .siblings
        .iter()
        .zip((root_depth..leaf_depth).rev().map(|depth| key.bit(depth)))
        .fold(leaf_hash, |hash, (sibling, bit)| {
            if bit {
                internal(hasher, sibling, &hash)
            } else {
                internal(hasher, &hash, sibling)
            }
        });

    ensure_root(computed, root)
}

/// Hash of the subtree at `depth` holding exactly `leaves`.
///
/// `leaves` must be sorted by key, distinct, and share their first `depth`
/// bits. Empty is the placeholder and a single leaf is its own subtree.
pub fn subtree_hash<H: Hasher>(hasher: &H, leaves: &[SparseMerkleLeafNode], depth: usize) -> HashValue {
    match leaves {
        [] => SPARSE_MERKLE_PLACEHOLDER_HASH,
        [leaf] => leaf.hash_with(hasher),
        _ => {
            let split = leaves.partition_point(|leaf| !leaf.key.bit(depth));
            let (left, right) = leaves.split_at(split);
            internal(
                hasher,
                &subtree_hash(hasher, left, depth + 1),
                &subtree_hash(hasher, right, depth + 1),
            )
        }
    }
}

/// Verify that `known_leaves` (strictly ascending by key) are every leaf up
/// to and including the last one, with the rest of the tree summarised by
/// `proof.right_siblings`.
pub fn verify_range<H: Hasher>(
    hasher: &H,
    root: HashValue,
    known_leaves: &[SparseMerkleLeafNode],
    proof: &SparseMerkleRangeProof,
) -> Result<(), ProofError> {
    let Some((rightmost, others)) = known_leaves.split_last() else {
        return Err(ProofError::EmptyLeaves);
    };
    if let Some(position) = known_leaves
        .windows(2)
        .position(|pair| pair[0].key >= pair[1].key)
    {
        return Err(ProofError::UnsortedLeaves {
            position: position + 1,
        });
    }
    if proof.right_siblings.len() > MAX_SPARSE_MERKLE_PROOF_DEPTH {
        return Err(ProofError::TooManySiblings {
            got: proof.right_siblings.len(),
            max: MAX_SPARSE_MERKLE_PROOF_DEPTH,
        });
    }

    let key = rightmost.key;
    // The rightmost leaf sits at least one level below where it parts from
    // its left neighbour
    let left_depth = others
        .last()
        .map_or(0, |prev| prev.key.common_prefix_bits_len(&key) + 1);

    // Walk down the rightmost key's path, top to bottom
    let mut right_siblings = proof.right_siblings.iter().rev();
    let mut remaining_left = others;
    let mut path: Vec<(bool, HashValue)> = Vec::new();
    let mut depth = 0;
    while depth < left_depth || right_siblings.len() > 0 {
        if depth >= HASH_LENGTH_IN_BITS {
            return Err(ProofError::UnusedSiblings {
                remaining: right_siblings.len(),
            });
        }
        if key.bit(depth) {
            // Known leaves parting from `key` at this depth form the left subtree
            let split = remaining_left.partition_point(|leaf| leaf.key.common_prefix_bits_len(&key) <= depth);
            let (group, rest) = remaining_left.split_at(split);
            path.push((true, subtree_hash(hasher, group, depth + 1)));
            remaining_left = rest;
        } else {
            let sibling = right_siblings
                .next()
                .ok_or(ProofError::MissingSibling { side: "right" })?;
            path.push((false, *sibling));
        }
        depth += 1;
    }

    let computed = path
        .iter()
        .rev()
        .fold(rightmost.hash_with(hasher), |hash, (bit, sibling)| {
            if *bit {
                internal(hasher, sibling, &hash)
            } else {
                internal(hasher, &hash, sibling)
            }
        });

    ensure_root(computed, root)
}
