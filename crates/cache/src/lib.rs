//! Tier-aware result cache for address matching.
//!
//! Entries are keyed by `(tier, subject member, address hash)` where the
//! address hash is the base fingerprint of the subject's normalized address.
//! TTLs follow the confidence of the tier that produced the result, and empty
//! results get a shorter negative TTL.
//!
//! The cache is an optimization only: backend failures are logged and counted
//! in [`CacheStats`], and surface to callers as a miss or a no-op.

mod backend;
mod config;

pub use backend::{CacheBackend, CacheEntry, InMemoryCacheBackend};
pub use config::{CacheConfig, MAX_TTL_SECS};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use canonical::Fingerprint;
use index::{MemberId, Tier};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache is full ({0} entries)")]
    Full(usize),
    #[error("invalid cache config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub subject: MemberId,
    pub address: Fingerprint,
}

impl CacheKey {
    pub fn new(subject: impl Into<MemberId>, address: Fingerprint) -> Self {
        Self {
            subject: subject.into(),
            address,
        }
    }
}

/// Ordered match list and the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValue {
    pub tier: Tier,
    pub members: Vec<MemberId>,
}

impl CacheValue {
    pub fn new(tier: Tier, members: Vec<MemberId>) -> Self {
        Self { tier, members }
    }

    pub fn is_negative(&self) -> bool {
        self.members.is_empty()
    }

    pub fn lists(&self, member: &MemberId) -> bool {
        self.members.contains(member)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub invalidations: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    cfg: CacheConfig,
    counters: Counters,
}

impl CacheManager {
    /// Manager over the default in-memory backend.
    pub fn new(cfg: CacheConfig) -> Self {
        let backend = Arc::new(InMemoryCacheBackend::new(cfg.max_entries));
        Self::with_backend(cfg, backend)
    }

    pub fn with_backend(cfg: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            cfg,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.cfg
    }

    pub fn get(&self, tier: Tier, key: &CacheKey) -> Option<CacheValue> {
        if !self.cfg.enabled {
            return None;
        }
        let entry = match self.backend.get(tier, key) {
            Ok(entry) => entry,
            Err(err) => {
                self.record_error("get", &err);
                None
            }
        };
        match entry {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tier = %tier, subject = %key.subject, "cache hit");
                Some(entry.value)
            }
            Some(_) => {
                if let Err(err) = self.backend.remove(tier, key) {
                    self.record_error("remove", &err);
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn set(&self, tier: Tier, key: CacheKey, value: CacheValue, ttl: Duration) {
        if !self.cfg.enabled {
            return;
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            self.record_error(
                "set",
                &CacheError::InvalidConfig(format!("ttl of {}s overflows the clock", ttl.as_secs())),
            );
            return;
        };
        let entry = CacheEntry { value, expires_at };
        match self.backend.set(tier, key, entry) {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => self.record_error("set", &err),
        }
    }

    /// Store a match result under its tier's TTL, or the negative TTL when
    /// the list is empty.
    pub fn store(&self, key: CacheKey, value: CacheValue) {
        let ttl = if value.is_negative() {
            self.cfg.negative_ttl()
        } else {
            self.cfg.ttl(value.tier)
        };
        self.set(value.tier, key, value, ttl);
    }

    /// Probe tiers cheapest first and return the first live entry.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheValue> {
        Tier::ALL.into_iter().find_map(|tier| self.get(tier, key))
    }

    /// Remove every entry matching `predicate`.
    pub fn invalidate<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(Tier, &CacheKey, &CacheValue) -> bool,
    {
        match self
            .backend
            .remove_where(&mut |tier, key, entry| predicate(tier, key, &entry.value))
        {
            Ok(removed) => {
                self.counters
                    .invalidations
                    .fetch_add(removed as u64, Ordering::Relaxed);
                removed
            }
            Err(err) => {
                self.record_error("invalidate", &err);
                0
            }
        }
    }

    /// Drop everything that could be stale after `member` changed address.
    ///
    /// Covers entries where the member is the subject, entries that list the
    /// member as a peer, and entries keyed on any of `addresses` (pass both
    /// the old and new address hashes).
    pub fn invalidate_member(&self, member: &MemberId, addresses: &[Fingerprint]) -> usize {
        let removed = self.invalidate(|_, key, value| {
            &key.subject == member || value.lists(member) || addresses.contains(&key.address)
        });
        tracing::debug!(member_id = %member, removed, "cache invalidated for member");
        removed
    }

    pub fn clear(&self) -> usize {
        self.invalidate(|_, _, _| true)
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    fn record_error(&self, op: &'static str, err: &CacheError) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        match err {
            CacheError::Full(_) => tracing::debug!(op, error = %err, "cache operation skipped"),
            CacheError::InvalidConfig(_) => tracing::warn!(op, error = %err, "cache write skipped"),
            _ => tracing::warn!(op, error = %err, "cache backend failure, degrading to miss"),
        }
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canonical::fingerprint;

    fn addr() -> Fingerprint {
        fingerprint("kerkstraat 12", "utrecht")
    }

    fn value(tier: Tier, members: &[&str]) -> CacheValue {
        CacheValue::new(tier, members.iter().map(|m| MemberId::from(*m)).collect())
    }

    struct FailingBackend;

    impl CacheBackend for FailingBackend {
        fn get(&self, _: Tier, _: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Backend("unreachable".into()))
        }
        fn set(&self, _: Tier, _: CacheKey, _: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Backend("unreachable".into()))
        }
        fn remove(&self, _: Tier, _: &CacheKey) -> Result<(), CacheError> {
            Err(CacheError::Backend("unreachable".into()))
        }
        fn remove_where(
            &self,
            _: &mut dyn FnMut(Tier, &CacheKey, &CacheEntry) -> bool,
        ) -> Result<usize, CacheError> {
            Err(CacheError::Backend("unreachable".into()))
        }
        fn len(&self) -> usize {
            0
        }
    }

    #[test]
    fn set_then_get_hits() {
        let cache = CacheManager::default();
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::Fingerprint, &["m-2"]));

        assert_eq!(
            cache.get(Tier::Fingerprint, &key),
            Some(value(Tier::Fingerprint, &["m-2"]))
        );
        assert_eq!(cache.get(Tier::Normalized, &key), None);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
    }

    #[test]
    fn lookup_probes_tiers_in_order() {
        let cache = CacheManager::default();
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::JoinFallback, &["m-9"]));
        cache.store(key.clone(), value(Tier::Normalized, &["m-3"]));

        assert_eq!(cache.lookup(&key).map(|v| v.tier), Some(Tier::Normalized));
    }

    #[test]
    fn expired_entries_miss() {
        let cache = CacheManager::default();
        let key = CacheKey::new("m-1", addr());
        cache.set(
            Tier::Fingerprint,
            key.clone(),
            value(Tier::Fingerprint, &["m-2"]),
            Duration::ZERO,
        );
        assert_eq!(cache.get(Tier::Fingerprint, &key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn invalidate_member_covers_subject_peer_and_address() {
        let cache = CacheManager::default();
        let other_addr = fingerprint("dorpsstraat 1", "ede");
        let third_addr = fingerprint("markt 3", "gouda");

        cache.store(CacheKey::new("m-1", addr()), value(Tier::Fingerprint, &["m-2"]));
        cache.store(CacheKey::new("m-2", addr()), value(Tier::Fingerprint, &["m-1"]));
        // Negative result for a future neighbour of m-1's new address.
        cache.store(CacheKey::new("m-5", other_addr.clone()), value(Tier::Normalized, &[]));
        cache.store(CacheKey::new("m-7", third_addr), value(Tier::Normalized, &["m-8"]));

        let removed = cache.invalidate_member(&"m-1".into(), &[addr(), other_addr]);
        assert_eq!(removed, 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[test]
    fn negative_results_use_short_ttl() {
        let cfg = CacheConfig {
            negative_ttl_secs: 0,
            join_ttl_secs: 300,
            ..CacheConfig::default()
        };
        let cache = CacheManager::new(cfg);
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::Fingerprint, &[]));
        assert_eq!(cache.lookup(&key), None);

        cache.store(key.clone(), value(Tier::Fingerprint, &["m-2"]));
        assert!(cache.lookup(&key).is_some());
    }

    #[test]
    fn failing_backend_degrades_to_miss() {
        let cache = CacheManager::with_backend(CacheConfig::default(), Arc::new(FailingBackend));
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::Fingerprint, &["m-2"]));
        assert_eq!(cache.lookup(&key), None);
        assert_eq!(cache.invalidate_member(&"m-1".into(), &[addr()]), 0);

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.errors, 5);
    }

    #[test]
    fn overflowing_ttl_skips_the_write() {
        let cache = CacheManager::new(CacheConfig {
            fingerprint_ttl_secs: u64::MAX,
            ..CacheConfig::default()
        });
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::Fingerprint, &["m-2"]));
        cache.set(Tier::Normalized, key.clone(), value(Tier::Normalized, &["m-2"]), Duration::MAX);

        assert_eq!(cache.lookup(&key), None);
        let stats = cache.stats();
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.errors, 2);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = CacheManager::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        let key = CacheKey::new("m-1", addr());
        cache.store(key.clone(), value(Tier::Fingerprint, &["m-2"]));
        assert!(cache.is_empty());
        assert_eq!(cache.lookup(&key), None);
    }
}
