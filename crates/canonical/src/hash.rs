//! Address fingerprints.
//!
//! A fingerprint is the first 8 bytes of a SHA-256 digest, hex-encoded to 16
//! characters. Three derivations exist:
//!
//! ```text
//! base:           SHA-256(line || "|" || city)
//! disambiguated:  SHA-256(line || "|" || city || 0x00 || counter_u8)
//! timestamp:      SHA-256(line || "|" || city || 0x01 || nanos_be_u64)
//! ```
//!
//! The base form depends only on the normalized fields, so it is stable across
//! processes and machines. The other two are only produced by collision
//! resolution in the index crate.
//!
//! ```rust
//! use canonical::fingerprint;
//!
//! let a = fingerprint("kerkstraat 12", "utrecht");
//! let b = fingerprint("kerkstraat 12", "utrecht");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str().len(), 16);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::NormalizationError;

/// Number of digest bytes kept in a fingerprint.
pub const FINGERPRINT_BYTES: usize = 8;

/// Length of a fingerprint's hex representation.
pub const FINGERPRINT_HEX_LEN: usize = FINGERPRINT_BYTES * 2;

const COUNTER_DISCRIMINATOR: u8 = 0x00;
const TIMESTAMP_DISCRIMINATOR: u8 = 0x01;

/// A validated 16-character lowercase hex fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        Self(hex::encode(&digest[..FINGERPRINT_BYTES]))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = NormalizationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == FINGERPRINT_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(NormalizationError::InvalidFingerprint(s.to_string()))
        }
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = NormalizationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.0
    }
}

fn composite_hasher(normalized_line: &str, normalized_city: &str) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(normalized_line.as_bytes());
    hasher.update(b"|");
    hasher.update(normalized_city.as_bytes());
    hasher
}

/// Base fingerprint of a normalized (line, city) pair.
///
/// Never fails. An empty pair still hashes; callers must check that both
/// fields are non-empty before treating the result as meaningful.
pub fn fingerprint(normalized_line: &str, normalized_city: &str) -> Fingerprint {
    let hasher = composite_hasher(normalized_line, normalized_city);
    Fingerprint::from_digest(&hasher.finalize())
}

/// Fingerprint variant `counter` used while resolving a collision.
pub fn disambiguated_fingerprint(
    normalized_line: &str,
    normalized_city: &str,
    counter: u8,
) -> Fingerprint {
    let mut hasher = composite_hasher(normalized_line, normalized_city);
    hasher.update([COUNTER_DISCRIMINATOR, counter]);
    Fingerprint::from_digest(&hasher.finalize())
}

/// Last-resort fingerprint once every counter collided.
///
/// Depends on the supplied timestamp, so it is not reproducible from the
/// address alone.
pub fn timestamp_fingerprint(
    normalized_line: &str,
    normalized_city: &str,
    unix_nanos: u64,
) -> Fingerprint {
    let mut hasher = composite_hasher(normalized_line, normalized_city);
    hasher.update([TIMESTAMP_DISCRIMINATOR]);
    hasher.update(unix_nanos.to_be_bytes());
    Fingerprint::from_digest(&hasher.finalize())
}
