use crate::error::{Classify, ErrorKind};
use crate::types::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur while parsing or agreeing on waypoints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WaypointError {
    #[error("Waypoint format invalid: {reason}")]
    InvalidFormat { reason: String },

    #[error("Record at version {version} does not hash to waypoint value {expected}")]
    Mismatch { version: u64, expected: HashValue },

    #[error("No waypoint sources available")]
    NoSources,

    #[error("Insufficient waypoint source agreement: {agreeing}/{total} sources agree (need {required})")]
    InsufficientAgreement {
        agreeing: usize,
        total: usize,
        required: usize,
    },

    #[error("Waypoint sources disagree: {first} and {second} both reach the required agreement")]
    ConflictingSources { first: Waypoint, second: Waypoint },
}

impl Classify for WaypointError {
    fn kind(&self) -> ErrorKind {
        match self {
            WaypointError::InvalidFormat { .. } => ErrorKind::MalformedEncoding,
            WaypointError::Mismatch { .. }
            | WaypointError::NoSources
            | WaypointError::InsufficientAgreement { .. }
            | WaypointError::ConflictingSources { .. } => ErrorKind::ProofMismatch,
        }
    }
}

/// A trusted `(version, record hash)` pair from which a light client can
/// bootstrap without replaying history.
///
/// Text form is `"<version>:<64 lowercase hex chars>"`, e.g.
/// `1000:aaaa…aaaa`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Waypoint {
    version: u64,
    value: HashValue,
}

impl Waypoint {
    /// Waypoint committing to `record` under the default hash backend.
    pub fn new(record: &SignedRecord) -> Self {
        Self::new_with(record, &Sha256Hasher)
    }

    pub fn new_with<H: Hasher>(record: &SignedRecord, hasher: &H) -> Self {
        Self {
            version: record.version,
            value: record.hash_with(hasher),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn value(&self) -> HashValue {
        self.value
    }

    /// Whether `record` is exactly the record this waypoint commits to.
    pub fn matches_with<H: Hasher>(&self, record: &SignedRecord, hasher: &H) -> bool {
        record.version == self.version && record.hash_with(hasher) == self.value
    }

    pub fn matches(&self, record: &SignedRecord) -> bool {
        self.matches_with(record, &Sha256Hasher)
    }

    /// Like [`Waypoint::matches`], but with a descriptive error.
    pub fn verify(&self, record: &SignedRecord) -> Result<(), WaypointError> {
        if self.matches(record) {
            Ok(())
        } else {
            Err(WaypointError::Mismatch {
                version: record.version,
                expected: self.value,
            })
        }
    }
}

impl fmt::Display for Waypoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.version, self.value.to_hex())
    }
}

fn invalid(reason: impl Into<String>) -> WaypointError {
    WaypointError::InvalidFormat {
        reason: reason.into(),
    }
}

impl FromStr for Waypoint {
    type Err = WaypointError;

    /// Strict parse: no whitespace, no `0x`, no uppercase, no leading zeros.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (version_str, hash_str) = s
            .split_once(':')
            .ok_or_else(|| invalid("Missing ':' separator"))?;

        if version_str.is_empty() || !version_str.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid(format!("Version is not a decimal number: {:?}", version_str)));
        }
        if version_str.len() > 1 && version_str.starts_with('0') {
            return Err(invalid("Version has leading zeros"));
        }
        let version = version_str
            .parse::<u64>()
            .map_err(|e| invalid(format!("Invalid version: {}", e)))?;

        if hash_str.len() != 2 * HASH_LENGTH {
            return Err(invalid(format!(
                "Expected {} hex characters, got {}",
                2 * HASH_LENGTH,
                hash_str.len()
            )));
        }
        if !hash_str.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid("Digest must be lowercase hex"));
        }
        let bytes = hex::decode(hash_str).map_err(|e| invalid(format!("Invalid hex: {}", e)))?;
        let value = HashValue::from_slice(&bytes).map_err(invalid)?;

        Ok(Self { version, value })
    }
}

impl Serialize for Waypoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.collect_str(self)
        } else {
            (self.version, self.value).serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Waypoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(serde::de::Error::custom)
        } else {
            let (version, value) = <(u64, HashValue)>::deserialize(deserializer)?;
            Ok(Self { version, value })
        }
    }
}

/// A waypoint enough independent sources agreed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgreedWaypoint {
    pub waypoint: Waypoint,
    /// How many sources reported this waypoint.
    pub source_agreement: usize,
    /// Total number of sources consulted.
    pub total_sources: usize,
}

/// Pick the waypoint that at least `required_agreement` sources report.
///
/// Bootstrapping is the one step that rests on social trust; asking several
/// operators narrows it to "not all of them collude". Everything after this
/// is checked cryptographically.
pub fn agree_on_waypoint(
    waypoints: &[Waypoint],
    required_agreement: usize,
) -> Result<AgreedWaypoint, WaypointError> {
    if waypoints.is_empty() {
        return Err(WaypointError::NoSources);
    }

    // Count how many sources agree on each waypoint, in first-seen order
    let mut agreement_counts: Vec<(Waypoint, usize)> = Vec::new();
    for waypoint in waypoints {
        match agreement_counts.iter_mut().find(|(w, _)| w == waypoint) {
            Some((_, count)) => *count += 1,
            None => agreement_counts.push((*waypoint, 1)),
        }
    }

    let mut qualifying = agreement_counts
        .iter()
        .filter(|(_, count)| required_agreement > 0 && *count >= required_agreement);

    match (qualifying.next(), qualifying.next()) {
        (Some((first, _)), Some((second, _))) => Err(WaypointError::ConflictingSources {
            first: *first,
            second: *second,
        }),
        (Some((waypoint, agreeing)), None) => Ok(AgreedWaypoint {
            waypoint: *waypoint,
            source_agreement: *agreeing,
            total_sources: waypoints.len(),
        }),
        (None, _) => Err(WaypointError::InsufficientAgreement {
            agreeing: agreement_counts.iter().map(|(_, c)| *c).max().unwrap_or(0),
            total: waypoints.len(),
            required: required_agreement,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn record(version: u64) -> SignedRecord {
        SignedRecord {
            epoch: 1,
            version,
            state_root: HashValue::new([3; 32]),
            accumulator_root: HashValue::new([4; 32]),
            timestamp_usecs: 7,
            next_validator_set: None,
        }
    }

    fn waypoint(version: u64, byte: u8) -> Waypoint {
        format!("{}:{}", version, hex::encode([byte; 32])).parse().unwrap()
    }

    #[test]
    fn test_parse_and_display_roundtrip() {
        let text = format!("1000:{}", "aa".repeat(32));
        let wp: Waypoint = text.parse().unwrap();
        assert_eq!(wp.version(), 1000);
        assert_eq!(
            wp.value(),
            HashValue::new(hex!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"))
        );
        assert_eq!(wp.to_string(), text);
    }

    #[test]
    fn test_parse_rejects_odd_hex() {
        let text = format!("1000:{}", "a".repeat(63));
        let err = text.parse::<Waypoint>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedEncoding);
    }

    #[test]
    fn test_parse_rejects_malformed_inputs() {
        let hash = "ab".repeat(32);
        let cases = [
            format!("1000{}", hash),
            format!(" 1000:{}", hash),
            format!("1000:{} ", hash),
            format!("1000 :{}", hash),
            format!("-1:{}", hash),
            format!("+1:{}", hash),
            format!(":{}", hash),
            format!("01:{}", hash),
            format!("18446744073709551616:{}", hash),
            format!("1:0x{}", &hash[2..]),
            format!("1:{}", hash.to_uppercase()),
            format!("1:{}", "zz".repeat(32)),
            format!("1:{}", "ab".repeat(33)),
            format!("1:{}:", hash),
            "1:".to_string(),
            String::new(),
        ];
        for case in &cases {
            let result = case.parse::<Waypoint>();
            assert!(
                matches!(result, Err(WaypointError::InvalidFormat { .. })),
                "accepted {:?}",
                case
            );
        }
    }

    #[test]
    fn test_parse_zero_version() {
        let wp: Waypoint = format!("0:{}", "00".repeat(32)).parse().unwrap();
        assert_eq!(wp.version(), 0);
    }

    #[test]
    fn test_matches_record() {
        let r = record(42);
        let wp = Waypoint::new(&r);
        assert!(wp.matches(&r));
        assert!(wp.verify(&r).is_ok());

        let mut other = r.clone();
        other.timestamp_usecs += 1;
        assert!(!wp.matches(&other));
        assert!(matches!(wp.verify(&other), Err(WaypointError::Mismatch { version: 42, .. })));
    }

    #[test]
    fn test_matches_requires_same_backend() {
        let r = record(42);
        let wp = Waypoint::new_with(&r, &Sha3Hasher);
        assert!(wp.matches_with(&r, &Sha3Hasher));
        assert!(!wp.matches(&r));
    }

    #[test]
    fn test_serde_forms() {
        let wp = Waypoint::new(&record(9));
        let json = serde_json::to_string(&wp).unwrap();
        assert_eq!(json, format!("\"{}\"", wp));
        assert_eq!(serde_json::from_str::<Waypoint>(&json).unwrap(), wp);

        let bytes = bcs::to_bytes(&wp).unwrap();
        assert_eq!(bytes.len(), 8 + 1 + 32);
        assert_eq!(bcs::from_bytes::<Waypoint>(&bytes).unwrap(), wp);
    }

    #[test]
    fn test_agreement_succeeds() {
        let a = waypoint(1000, 0xAA);
        let b = waypoint(999, 0xBB);
        let agreed = agree_on_waypoint(&[a, a, b, a], 3).unwrap();
        assert_eq!(agreed.waypoint, a);
        assert_eq!(agreed.source_agreement, 3);
        assert_eq!(agreed.total_sources, 4);
    }

    #[test]
    fn test_agreement_insufficient() {
        let a = waypoint(1000, 0xAA);
        let b = waypoint(1000, 0xBB);
        let result = agree_on_waypoint(&[a, a, b, b], 3);
        assert!(matches!(
            result,
            Err(WaypointError::InsufficientAgreement { agreeing: 2, total: 4, required: 3 })
        ));
    }

    #[test]
    fn test_agreement_conflicting() {
        let a = waypoint(1000, 0xAA);
        let b = waypoint(1000, 0xBB);
        let result = agree_on_waypoint(&[a, a, b, b], 2);
        assert!(matches!(result, Err(WaypointError::ConflictingSources { .. })));
    }

    #[test]
    fn test_agreement_empty_and_zero_required() {
        assert_eq!(agree_on_waypoint(&[], 1), Err(WaypointError::NoSources));
        let a = waypoint(1, 1);
        assert!(matches!(
            agree_on_waypoint(&[a], 0),
            Err(WaypointError::InsufficientAgreement { required: 0, .. })
        ));
    }
}
