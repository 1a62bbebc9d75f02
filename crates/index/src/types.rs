use std::fmt;

use canonical::{Fingerprint, NormalizedAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::IndexError;

/// Identifier of a member in the host's record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// The four computed address fields stored for a member.
///
/// Constructed only through [`ComputedFields::new`] or
/// `RawComputedFields::into_typed`, so a value of this type always carries a
/// valid fingerprint and non-empty normalized fields. Deserialization goes
/// through the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawComputedFields", into = "RawComputedFields")]
pub struct ComputedFields {
    fingerprint: Fingerprint,
    normalized_line: String,
    normalized_city: String,
    last_computed_at: DateTime<Utc>,
}

impl ComputedFields {
    pub fn new(
        fingerprint: Fingerprint,
        normalized_line: impl Into<String>,
        normalized_city: impl Into<String>,
        last_computed_at: DateTime<Utc>,
    ) -> Result<Self, IndexError> {
        let normalized_line = normalized_line.into();
        let normalized_city = normalized_city.into();
        if normalized_line.is_empty() || normalized_city.is_empty() {
            return Err(IndexError::InvalidFields(
                "normalized line and city must be non-empty".into(),
            ));
        }
        Ok(Self {
            fingerprint,
            normalized_line,
            normalized_city,
            last_computed_at,
        })
    }

    /// Fields for `address` persisted under `fingerprint`, which may differ
    /// from the address's base fingerprint after collision resolution.
    pub fn for_address(
        address: &NormalizedAddress,
        fingerprint: Fingerprint,
        at: DateTime<Utc>,
    ) -> Result<Self, IndexError> {
        Self::new(fingerprint, address.line.clone(), address.city.clone(), at)
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn normalized_line(&self) -> &str {
        &self.normalized_line
    }

    pub fn normalized_city(&self) -> &str {
        &self.normalized_city
    }

    pub fn last_computed_at(&self) -> DateTime<Utc> {
        self.last_computed_at
    }

    pub fn same_location(&self, line: &str, city: &str) -> bool {
        self.normalized_line == line && self.normalized_city == city
    }
}

/// Untyped computed fields as they arrive from a host record.
///
/// Legacy records have none of the fields; anything in between is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawComputedFields {
    pub fingerprint: Option<String>,
    pub normalized_line: Option<String>,
    pub normalized_city: Option<String>,
    pub last_computed_at: Option<DateTime<Utc>>,
}

impl RawComputedFields {
    /// Validate into typed fields. `Ok(None)` means "never computed".
    pub fn into_typed(self) -> Result<Option<ComputedFields>, IndexError> {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, str::is_empty);
        match self {
            Self {
                fingerprint,
                normalized_line,
                normalized_city,
                last_computed_at: None,
            } if blank(&fingerprint) && blank(&normalized_line) && blank(&normalized_city) => {
                Ok(None)
            }
            Self {
                fingerprint: Some(fingerprint),
                normalized_line: Some(line),
                normalized_city: Some(city),
                last_computed_at: Some(at),
            } => {
                let fingerprint: Fingerprint = fingerprint
                    .parse()
                    .map_err(|e| IndexError::InvalidFields(format!("{e}")))?;
                ComputedFields::new(fingerprint, line, city, at).map(Some)
            }
            _ => Err(IndexError::InvalidFields(
                "partial computed fields: all four must be set together".into(),
            )),
        }
    }
}

impl TryFrom<RawComputedFields> for ComputedFields {
    type Error = IndexError;

    /// Strict conversion: a legacy (all-empty) record is an error here.
    fn try_from(raw: RawComputedFields) -> Result<Self, Self::Error> {
        raw.into_typed()?
            .ok_or_else(|| IndexError::InvalidFields("computed fields missing".into()))
    }
}

impl From<&ComputedFields> for RawComputedFields {
    fn from(value: &ComputedFields) -> Self {
        Self {
            fingerprint: Some(value.fingerprint.to_string()),
            normalized_line: Some(value.normalized_line.clone()),
            normalized_city: Some(value.normalized_city.clone()),
            last_computed_at: Some(value.last_computed_at),
        }
    }
}

impl From<ComputedFields> for RawComputedFields {
    fn from(value: ComputedFields) -> Self {
        Self {
            fingerprint: Some(value.fingerprint.to_string()),
            normalized_line: Some(value.normalized_line),
            normalized_city: Some(value.normalized_city),
            last_computed_at: Some(value.last_computed_at),
        }
    }
}

/// How much the stored fingerprint can be trusted for Tier 1 lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Base or counter-disambiguated fingerprint; reproducible from the address.
    #[default]
    Full,
    /// Timestamp fallback after every counter collided.
    Reduced,
}

/// Lookup strategy that produced a match list, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Exact fingerprint lookup.
    Fingerprint,
    /// Exact (normalized line, normalized city) lookup.
    Normalized,
    /// Re-normalizing raw addresses from the record store.
    JoinFallback,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Fingerprint, Tier::Normalized, Tier::JoinFallback];

    pub fn number(self) -> u8 {
        match self {
            Tier::Fingerprint => 1,
            Tier::Normalized => 2,
            Tier::JoinFallback => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fingerprint => "fingerprint",
            Tier::Normalized => "normalized",
            Tier::JoinFallback => "join_fallback",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted index row for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRow {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub member_id: MemberId,
    pub fields: ComputedFields,
    pub confidence: Confidence,
    /// Set when the member was deleted; the row stays until purged.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl IndexRow {
    pub fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

const fn default_schema_version() -> u16 {
    crate::INDEX_SCHEMA_VERSION
}

/// Result of [`MatchIndex::upsert`](crate::MatchIndex::upsert).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The row was written. `previous` holds the replaced fields, if any.
    Written { previous: Option<ComputedFields> },
    /// An existing row is newer; nothing was written.
    Stale { current: DateTime<Utc> },
}
