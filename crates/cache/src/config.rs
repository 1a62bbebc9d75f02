use std::time::Duration;

use index::Tier;
use serde::{Deserialize, Serialize};

use crate::CacheError;

/// Longest TTL any tier may be configured with: one year.
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Time-to-live per tier, in seconds.
///
/// Cheaper and more precise tiers live longer. Empty results use
/// `negative_ttl_secs`, which must be shorter than every tier TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub fingerprint_ttl_secs: u64,
    pub normalized_ttl_secs: u64,
    pub join_ttl_secs: u64,
    pub negative_ttl_secs: u64,
    /// Upper bound on stored entries for the in-memory backend.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fingerprint_ttl_secs: 3600,
            normalized_ttl_secs: 1800,
            join_ttl_secs: 300,
            negative_ttl_secs: 60,
            max_entries: 100_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Fingerprint => self.fingerprint_ttl_secs,
            Tier::Normalized => self.normalized_ttl_secs,
            Tier::JoinFallback => self.join_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        let tiers = [
            self.fingerprint_ttl_secs,
            self.normalized_ttl_secs,
            self.join_ttl_secs,
        ];
        if tiers.contains(&0) {
            return Err(CacheError::InvalidConfig(
                "tier TTLs must be greater than zero".into(),
            ));
        }
        if tiers.iter().any(|&secs| secs > MAX_TTL_SECS) {
            return Err(CacheError::InvalidConfig(format!(
                "tier TTLs must not exceed {MAX_TTL_SECS} seconds"
            )));
        }
        if !(self.fingerprint_ttl_secs >= self.normalized_ttl_secs
            && self.normalized_ttl_secs >= self.join_ttl_secs)
        {
            return Err(CacheError::InvalidConfig(
                "TTLs must not increase from fingerprint to normalized to join".into(),
            ));
        }
        if self.negative_ttl_secs >= self.join_ttl_secs {
            return Err(CacheError::InvalidConfig(
                "negative_ttl_secs must be shorter than every tier TTL".into(),
            ));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig("max_entries must be positive".into()));
        }
        Ok(())
    }
}
