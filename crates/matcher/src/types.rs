use std::time::Duration;

use chrono::NaiveDate;
use index::{ComputedFields, IndexError, MemberId, Tier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Membership lifecycle status as held by the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Active,
    Pending,
    Suspended,
    Terminated,
    Expired,
    Banned,
    Deceased,
    Disabled,
}

/// Postal address as entered by the member. Never modified here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressRecord {
    pub line: String,
    pub city: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl AddressRecord {
    pub fn new(line: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            city: city.into(),
            postal_code: None,
            country: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub member_id: MemberId,
    pub status: MemberStatus,
    /// Association date; earlier members sort first in match results.
    pub member_since: NaiveDate,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub address: Option<AddressRecord>,
    /// Absent for legacy records that were never backfilled.
    #[serde(default)]
    pub computed: Option<ComputedFields>,
}

/// Ordered peers found for a subject and the tier that found them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub tier: Tier,
    pub members: Vec<MemberRecord>,
}

impl MatchResult {
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|m| m.member_id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Matcher tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchConfig {
    #[serde(default = "MatchConfig::default_max_results")]
    pub max_results: usize,
    /// Statuses that may appear in match results.
    #[serde(default = "MatchConfig::default_active_statuses")]
    pub active_statuses: Vec<MemberStatus>,
    /// Budget for a Tier 1 or Tier 2 index lookup; exceeding it is a miss.
    #[serde(default = "MatchConfig::default_index_timeout_ms")]
    pub index_timeout_ms: u64,
    /// Budget for the Tier 3 store query; exceeding it is an error.
    #[serde(default = "MatchConfig::default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

impl MatchConfig {
    pub(crate) fn default_max_results() -> usize {
        10
    }

    pub(crate) fn default_active_statuses() -> Vec<MemberStatus> {
        vec![
            MemberStatus::Active,
            MemberStatus::Pending,
            MemberStatus::Suspended,
        ]
    }

    pub(crate) fn default_index_timeout_ms() -> u64 {
        250
    }

    pub(crate) fn default_join_timeout_ms() -> u64 {
        2_000
    }

    pub fn index_timeout(&self) -> Duration {
        Duration::from_millis(self.index_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn is_active(&self, status: MemberStatus) -> bool {
        self.active_statuses.contains(&status)
    }

    pub fn validate(&self) -> Result<(), MatchError> {
        if self.max_results == 0 {
            return Err(MatchError::InvalidConfig(
                "max_results must be greater than zero".into(),
            ));
        }
        if self.active_statuses.is_empty() {
            return Err(MatchError::InvalidConfig(
                "active_statuses must list at least one status".into(),
            ));
        }
        if self.index_timeout_ms == 0 || self.join_timeout_ms == 0 {
            return Err(MatchError::InvalidConfig(
                "timeouts must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_results: Self::default_max_results(),
            active_statuses: Self::default_active_statuses(),
            index_timeout_ms: Self::default_index_timeout_ms(),
            join_timeout_ms: Self::default_join_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid match config: {0}")]
    InvalidConfig(String),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("member store error: {0}")]
    Store(#[from] StoreError),
    #[error("{tier} lookup timed out after {after_ms} ms")]
    Timeout { tier: Tier, after_ms: u64 },
    #[error("lookup task failed: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = MatchConfig::default();
        cfg.validate().unwrap();
        assert!(cfg.is_active(MemberStatus::Suspended));
        assert!(!cfg.is_active(MemberStatus::Terminated));
        assert_eq!(cfg.index_timeout(), Duration::from_millis(250));
        assert_eq!(cfg.join_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn empty_status_set_rejected() {
        let cfg = MatchConfig {
            active_statuses: Vec::new(),
            ..MatchConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(MatchError::InvalidConfig(_))));
    }
}
