use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use tiny_keccak::{Hasher as _, Sha3};

/// Number of bytes in every digest produced by a [`Hasher`].
pub const HASH_LENGTH: usize = 32;

/// Number of bits in a [`HashValue`], the depth of the sparse Merkle key space.
pub const HASH_LENGTH_IN_BITS: usize = HASH_LENGTH * 8;

/// Marker for an accumulator subtree that holds no leaves, at any height.
pub const ACCUMULATOR_PLACEHOLDER_HASH: HashValue =
    HashValue::new(*b"ACCUMULATOR_PLACEHOLDER_HASH\0\0\0\0");

/// Marker for an empty sparse Merkle subtree, at any height.
pub const SPARSE_MERKLE_PLACEHOLDER_HASH: HashValue =
    HashValue::new(*b"SPARSE_MERKLE_PLACEHOLDER_HASH\0\0");

/// A 32-byte digest. Displayed and serialized (in human-readable formats) as
/// lowercase hex without a `0x` prefix; binary formats carry the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashValue([u8; HASH_LENGTH]);

impl HashValue {
    pub const fn new(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    pub const fn zero() -> Self {
        Self([0u8; HASH_LENGTH])
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, &'static str> {
        if bytes.len() != HASH_LENGTH {
            return Err("Invalid hash length");
        }
        let mut arr = [0u8; HASH_LENGTH];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Bit `index` counting from the most significant bit of byte 0.
    pub fn bit(&self, index: usize) -> bool {
        debug_assert!(index < HASH_LENGTH_IN_BITS);
        (self.0[index / 8] >> (7 - index % 8)) & 1 == 1
    }

    /// Iterate the bits from most to least significant.
    pub fn iter_bits(&self) -> impl DoubleEndedIterator<Item = bool> + ExactSizeIterator + '_ {
        (0..HASH_LENGTH_IN_BITS).map(move |i| self.bit(i))
    }

    /// Number of leading bits shared with `other`.
    pub fn common_prefix_bits_len(&self, other: &HashValue) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let diff = a ^ b;
            if diff != 0 {
                return i * 8 + diff.leading_zeros() as usize;
            }
        }
        HASH_LENGTH_IN_BITS
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self.to_hex())
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<[u8; HASH_LENGTH]> for HashValue {
    fn from(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for HashValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for HashValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            Self::from_slice(&bytes).map_err(serde::de::Error::custom)
        }
    }
}

/// Hashing capability used for every node, leaf and record digest.
///
/// Implementations must be deterministic and collision resistant; the
/// Merkle and ratchet logic never depends on which backend is plugged in.
pub trait Hasher: Send + Sync {
    /// Digest the concatenation of `parts`.
    fn digest(&self, parts: &[&[u8]]) -> HashValue;

    /// Domain seed for `tag`: `digest("KEEL::" ++ tag)`.
    fn seed(&self, tag: &str) -> HashValue {
        self.digest(&[DOMAIN_PREFIX, tag.as_bytes()])
    }

    /// Domain-separated digest: `digest(seed(tag) ++ parts)`.
    fn tagged(&self, tag: &str, parts: &[&[u8]]) -> HashValue {
        let seed = self.seed(tag);
        let mut all: Vec<&[u8]> = Vec::with_capacity(parts.len() + 1);
        all.push(seed.as_ref());
        all.extend_from_slice(parts);
        self.digest(&all)
    }
}

const DOMAIN_PREFIX: &[u8] = b"KEEL::";

/// Domain tags.
pub mod tags {
    pub const SIGNED_RECORD: &str = "SignedRecord";
    pub const ACCUMULATOR_INTERNAL: &str = "AccumulatorInternal";
    pub const ACCUMULATOR_LEAF: &str = "AccumulatorLeaf";
    pub const SPARSE_MERKLE_LEAF: &str = "SparseMerkleLeaf";
    pub const SPARSE_MERKLE_INTERNAL: &str = "SparseMerkleInternal";
}

/// SHA-256 backend. The default everywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha256Hasher;

impl Hasher for Sha256Hasher {
    fn digest(&self, parts: &[&[u8]]) -> HashValue {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part);
        }
        let result = hasher.finalize();
        let mut output = [0u8; HASH_LENGTH];
        output.copy_from_slice(&result);
        HashValue(output)
    }
}

/// SHA3-256 backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha3Hasher;

impl Hasher for Sha3Hasher {
    fn digest(&self, parts: &[&[u8]]) -> HashValue {
        let mut sha3 = Sha3::v256();
        for part in parts {
            sha3.update(part);
        }
        let mut output = [0u8; HASH_LENGTH];
        sha3.finalize(&mut output);
        HashValue(output)
    }
}

/// Hash of an accumulator leaf's raw payload (e.g. a serialized transaction).
pub fn accumulator_leaf_hash<H: Hasher>(hasher: &H, payload: &[u8]) -> HashValue {
    hasher.tagged(tags::ACCUMULATOR_LEAF, &[payload])
}

/// Hash binding a state value's bytes, as committed in a sparse Merkle leaf.
pub fn value_hash<H: Hasher>(hasher: &H, value: &[u8]) -> HashValue {
    hasher.digest(&[value])
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_sha256_known_vector() {
        // SHA256("abc")
        let digest = Sha256Hasher.digest(&[b"abc"]);
        assert_eq!(
            digest.as_bytes(),
            &hex!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
    }

    #[test]
    fn test_sha3_known_vector() {
        // SHA3-256("")
        let digest = Sha3Hasher.digest(&[]);
        assert_eq!(
            digest.as_bytes(),
            &hex!("a7ffc6f8bf1ed76651c14756a061d662f580ff4de43b49fa82d80a4b80f8434a")
        );
    }

    #[test]
    fn test_digest_parts_concatenate() {
        let split = Sha256Hasher.digest(&[b"ab", b"c"]);
        let whole = Sha256Hasher.digest(&[b"abc"]);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_tagged_domains_differ() {
        let a = Sha256Hasher.tagged(tags::ACCUMULATOR_INTERNAL, &[b"x"]);
        let b = Sha256Hasher.tagged(tags::SPARSE_MERKLE_INTERNAL, &[b"x"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_bits_msb_first() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0b1000_0001;
        let h = HashValue::new(bytes);
        assert!(h.bit(0));
        assert!(!h.bit(1));
        assert!(h.bit(7));
        assert!(!h.bit(8));
        assert_eq!(h.iter_bits().filter(|b| *b).count(), 2);
    }

    #[test]
    fn test_common_prefix_bits_len() {
        let a = HashValue::new([0xFF; 32]);
        let mut b_bytes = [0xFF; 32];
        b_bytes[1] = 0b1110_1111;
        let b = HashValue::new(b_bytes);
        assert_eq!(a.common_prefix_bits_len(&b), 11);
        assert_eq!(a.common_prefix_bits_len(&a), 256);
    }

    #[test]
    fn test_hash_value_json_is_hex() {
        let h = HashValue::new([0xAB; 32]);
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: HashValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_hash_value_bcs_is_raw() {
        let h = HashValue::new([0x01; 32]);
        let bytes = bcs::to_bytes(&h).unwrap();
        // ULEB128 length prefix + 32 raw bytes
        assert_eq!(bytes.len(), 33);
        assert_eq!(bytes[0], 32);
        let back: HashValue = bcs::from_bytes(&bytes).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_placeholders_distinct() {
        assert_ne!(ACCUMULATOR_PLACEHOLDER_HASH, SPARSE_MERKLE_PLACEHOLDER_HASH);
    }
}
