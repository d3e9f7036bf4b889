use bitvec::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Number of bytes in a BLS12-381 public key (compressed G1 point).
pub const BLS_PUBKEY_LEN: usize = 48;

/// Number of bytes in a BLS12-381 signature (compressed G2 point).
pub const BLS_SIGNATURE_LEN: usize = 96;

/// Number of bytes in a validator account address.
pub const ACCOUNT_ADDRESS_LEN: usize = 32;

/// Upper bound on validator set size; the bitmask length is encoded as `u32`
/// but anything beyond this is treated as malformed.
pub const MAX_VALIDATOR_SET_SIZE: usize = 65_536;

/// Errors raised when building or decoding validator data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidatorSetError {
    #[error("Validator {id} has zero voting power")]
    ZeroVotingPower { id: AccountAddress },

    #[error("Duplicate validator id {id}")]
    DuplicateValidator { id: AccountAddress },

    #[error("Validator set has {size} members, maximum is {MAX_VALIDATOR_SET_SIZE}")]
    TooManyValidators { size: usize },

    #[error("Signer bitmask declares {num_bits} bits but carries {got} bytes (expected {expected})")]
    BitmaskByteLength {
        num_bits: u32,
        expected: usize,
        got: usize,
    },

    #[error("Signer bitmask has bits set beyond its declared length {num_bits}")]
    BitmaskPadding { num_bits: u32 },
}

macro_rules! fixed_bytes {
    ($name:ident, $len:expr, $what:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub fn from_bytes(bytes: &[u8]) -> Result<Self, &'static str> {
                if bytes.len() != $len {
                    return Err(concat!("Invalid ", $what, " length"));
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(bytes);
                Ok(Self(arr))
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                if serializer.is_human_readable() {
                    serializer.serialize_str(&hex::encode(self.0))
                } else {
                    serializer.serialize_bytes(&self.0)
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let bytes = if deserializer.is_human_readable() {
                    let s = String::deserialize(deserializer)?;
                    let s = s.strip_prefix("0x").unwrap_or(&s);
                    hex::decode(s).map_err(serde::de::Error::custom)?
                } else {
                    Vec::<u8>::deserialize(deserializer)?
                };
                Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
            }
        }
    };
}

fixed_bytes!(BlsPublicKey, BLS_PUBKEY_LEN, "BLS public key");
fixed_bytes!(BlsSignature, BLS_SIGNATURE_LEN, "BLS signature");
fixed_bytes!(AccountAddress, ACCOUNT_ADDRESS_LEN, "account address");

/// One validator's identity and weight within an epoch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub id: AccountAddress,
    pub public_key: BlsPublicKey,
    pub voting_power: u64,
}

impl ValidatorInfo {
    pub fn new(id: AccountAddress, public_key: BlsPublicKey, voting_power: u64) -> Self {
        Self {
            id,
            public_key,
            voting_power,
        }
    }
}

/// The full signer population for one epoch.
///
/// Order is significant: bit `i` of a [`SignerBitmask`] refers to
/// `validators[i]`. Totals are derived on construction and never serialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ValidatorSetRepr", into = "ValidatorSetRepr")]
pub struct ValidatorSet {
    validators: Vec<ValidatorInfo>,
    total_voting_power: u128,
    quorum_voting_power: u128,
}

#[derive(Serialize, Deserialize)]
struct ValidatorSetRepr {
    validators: Vec<ValidatorInfo>,
}

impl TryFrom<ValidatorSetRepr> for ValidatorSet {
    type Error = ValidatorSetError;

    fn try_from(repr: ValidatorSetRepr) -> Result<Self, Self::Error> {
        ValidatorSet::new(repr.validators)
    }
}

impl From<ValidatorSet> for ValidatorSetRepr {
    fn from(set: ValidatorSet) -> Self {
        ValidatorSetRepr {
            validators: set.validators,
        }
    }
}

impl ValidatorSet {
    /// Build a validator set, rejecting zero-power members and duplicate ids.
    pub fn new(validators: Vec<ValidatorInfo>) -> Result<Self, ValidatorSetError> {
        if validators.len() > MAX_VALIDATOR_SET_SIZE {
            return Err(ValidatorSetError::TooManyValidators {
                size: validators.len(),
            });
        }

        let mut seen = HashSet::with_capacity(validators.len());
        for v in &validators {
            if v.voting_power == 0 {
                return Err(ValidatorSetError::ZeroVotingPower { id: v.id });
            }
            if !seen.insert(v.id) {
                return Err(ValidatorSetError::DuplicateValidator { id: v.id });
            }
        }

        // u64 powers summed into u128 cannot overflow at this set size
        let total_voting_power: u128 = validators.iter().map(|v| v.voting_power as u128).sum();
        let quorum_voting_power = total_voting_power * 2 / 3 + 1;

        Ok(Self {
            validators,
            total_voting_power,
            quorum_voting_power,
        })
    }

    pub fn validators(&self) -> &[ValidatorInfo] {
        &self.validators
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn total_voting_power(&self) -> u128 {
        self.total_voting_power
    }

    /// `floor(total * 2 / 3) + 1`.
    pub fn quorum_voting_power(&self) -> u128 {
        self.quorum_voting_power
    }

    pub fn get(&self, index: usize) -> Option<&ValidatorInfo> {
        self.validators.get(index)
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn index_of(&self, id: &AccountAddress) -> Option<usize> {
        self.validators.iter().position(|v| &v.id == id)
    }
}

/// A validator set together with the epoch it is authoritative for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochState {
    pub epoch: u64,
    pub validator_set: ValidatorSet,
}

impl EpochState {
    pub fn new(epoch: u64, validator_set: ValidatorSet) -> Self {
        Self {
            epoch,
            validator_set,
        }
    }
}

/// Which validators of a set co-signed a record.
///
/// Bit `i` (most significant bit first within each byte) marks
/// `validators[i]` as a signer. Encoded as the declared bit count plus the
/// packed bytes; a byte count that does not match the declared length, or
/// set bits in the trailing padding, is a decode error.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignerBitmaskRepr", into = "SignerBitmaskRepr")]
pub struct SignerBitmask {
    bits: BitVec<u8, Msb0>,
}

#[derive(Serialize, Deserialize)]
struct SignerBitmaskRepr {
    num_bits: u32,
    bytes: Vec<u8>,
}

impl TryFrom<SignerBitmaskRepr> for SignerBitmask {
    type Error = ValidatorSetError;

    fn try_from(repr: SignerBitmaskRepr) -> Result<Self, Self::Error> {
        SignerBitmask::from_bytes(repr.num_bits, repr.bytes)
    }
}

impl From<SignerBitmask> for SignerBitmaskRepr {
    fn from(mut mask: SignerBitmask) -> Self {
        mask.bits.set_uninitialized(false);
        SignerBitmaskRepr {
            num_bits: mask.bits.len() as u32,
            bytes: mask.bits.into_vec(),
        }
    }
}

impl SignerBitmask {
    /// An all-zero bitmask over `num_validators` slots.
    pub fn new(num_validators: usize) -> Self {
        Self {
            bits: bitvec![u8, Msb0; 0; num_validators],
        }
    }

    /// A bitmask with exactly the given indices set.
    pub fn from_indices(num_validators: usize, indices: &[usize]) -> Self {
        let mut mask = Self::new(num_validators);
        for &i in indices {
            mask.set(i, true);
        }
        mask
    }

    /// Decode from a declared bit count and packed bytes.
    pub fn from_bytes(num_bits: u32, bytes: Vec<u8>) -> Result<Self, ValidatorSetError> {
        let expected = (num_bits as usize).div_ceil(8);
        if (num_bits as usize) > MAX_VALIDATOR_SET_SIZE || bytes.len() != expected {
            return Err(ValidatorSetError::BitmaskByteLength {
                num_bits,
                expected,
                got: bytes.len(),
            });
        }
        let mut bits = BitVec::<u8, Msb0>::from_vec(bytes);
        if bits[num_bits as usize..].any() {
            return Err(ValidatorSetError::BitmaskPadding { num_bits });
        }
        bits.truncate(num_bits as usize);
        Ok(Self { bits })
    }

    /// Number of slots, which must equal the size of the validator set.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Set or clear slot `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        if index < self.bits.len() {
            self.bits.set(index, value);
        }
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Number of signers.
    pub fn count_ones(&self) -> usize {
        self.bits.count_ones()
    }

    /// Indices of all signers, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.bits.iter_ones()
    }

    #[cfg(any(test, feature = "test-helpers"))]
    pub fn as_raw_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }
}
