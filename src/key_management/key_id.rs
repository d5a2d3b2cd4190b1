//! Key identifiers.
//!
//! Identifiers minted by the service are the decimal number of seconds since
//! the Unix epoch at creation time, which is also how rotation learns a key's
//! age. Callers that import keys may choose any identifier that passes
//! `KeyId::new`; such identifiers carry no creation time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{error_codes, KmsError, KmsResult};

/// Longest identifier accepted from callers
pub const MAX_KEY_ID_LEN: usize = 128;

/// Characters that end or escape a path segment
const RESERVED: [char; 4] = ['/', '?', '#', '%'];

/// Opaque key identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId(String);

impl KeyId {
    /// Validate a caller-supplied identifier.
    ///
    /// Identifiers must be non-empty, at most `MAX_KEY_ID_LEN` bytes, and
    /// contain no whitespace, control characters or any of `/ ? # %`, so
    /// they travel verbatim as the last segment of a request path.
    pub fn new(id: impl Into<String>) -> KmsResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_KEY_ID_LEN {
            return Err(KmsError::invalid_input(
                "key_id",
                &format!("1..={} bytes", MAX_KEY_ID_LEN),
                &format!("{} bytes", id.len()),
                error_codes::INVALID_KEY_ID,
            ));
        }
        if let Some(bad) = id
            .chars()
            .find(|c| RESERVED.contains(c) || c.is_whitespace() || c.is_control())
        {
            return Err(KmsError::invalid_input(
                "key_id",
                "no whitespace, control characters or any of / ? # %",
                &format!("{:?}", bad),
                error_codes::INVALID_KEY_ID,
            ));
        }
        Ok(Self(id))
    }

    /// Identifier for a key created at `secs` seconds since the epoch
    pub fn from_timestamp(secs: i64) -> Self {
        Self(secs.to_string())
    }

    /// Creation time encoded in the identifier.
    ///
    /// Fails with `InvalidInput` when the identifier is not a decimal
    /// timestamp, which is the case for most imported keys.
    pub fn created_at(&self) -> KmsResult<i64> {
        if !self.0.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
            return Err(self.not_a_timestamp());
        }
        self.0.parse::<i64>().map_err(|_| self.not_a_timestamp())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn not_a_timestamp(&self) -> KmsError {
        KmsError::invalid_input(
            "key_id",
            "decimal seconds since the epoch",
            &self.0,
            error_codes::INVALID_KEY_ID,
        )
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for KeyId {
    type Err = KmsError;

    fn from_str(s: &str) -> KmsResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for KeyId {
    type Error = KmsError;

    fn try_from(value: String) -> KmsResult<Self> {
        Self::new(value)
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let id = KeyId::from_timestamp(1_700_000_000);
        assert_eq!(id.as_str(), "1700000000");
        assert_eq!(id.created_at().unwrap(), 1_700_000_000);
    }

    #[test]
    fn test_imported_id_has_no_creation_time() {
        let id = KeyId::new("billing-db").unwrap();
        assert!(matches!(id.created_at(), Err(KmsError::InvalidInput { .. })));
        assert!(KeyId::new("+17").unwrap().created_at().is_err());
    }

    #[test]
    fn test_rejects_bad_ids() {
        assert!(KeyId::new("").is_err());
        assert!(KeyId::new("a/b").is_err());
        assert!(KeyId::new("a b").is_err());
        for reserved in ["a?b", "a#b", "a%2Fb"] {
            assert!(matches!(
                KeyId::new(reserved),
                Err(KmsError::InvalidInput { .. })
            ));
        }
        assert!(KeyId::new("x".repeat(MAX_KEY_ID_LEN + 1)).is_err());
        assert!(KeyId::new("x".repeat(MAX_KEY_ID_LEN)).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let id: KeyId = serde_json::from_str("\"1700000000\"").unwrap();
        assert_eq!(id, KeyId::from_timestamp(1_700_000_000));
        assert!(serde_json::from_str::<KeyId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1700000000\"");
    }
}
