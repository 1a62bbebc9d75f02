use std::time::Instant;

use dashmap::DashMap;
use index::Tier;

use crate::{CacheError, CacheKey, CacheValue};

/// A stored value with its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub expires_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Storage behind [`CacheManager`](crate::CacheManager).
///
/// Implementations only need atomic single-key get/set/remove; expiry is
/// decided by the manager.
pub trait CacheBackend: Send + Sync {
    fn get(&self, tier: Tier, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;
    fn set(&self, tier: Tier, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError>;
    fn remove(&self, tier: Tier, key: &CacheKey) -> Result<(), CacheError>;
    /// Remove every entry matching `predicate`, returning how many went.
    fn remove_where(
        &self,
        predicate: &mut dyn FnMut(Tier, &CacheKey, &CacheEntry) -> bool,
    ) -> Result<usize, CacheError>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local backend on a sharded `DashMap`.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: DashMap<(Tier, CacheKey), CacheEntry>,
    max_entries: usize,
}

impl InMemoryCacheBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::new(crate::CacheConfig::default().max_entries)
    }
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, tier: Tier, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self
            .entries
            .get(&(tier, key.clone()))
            .map(|entry| entry.value().clone()))
    }

    fn set(&self, tier: Tier, key: CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let slot = (tier, key);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&slot) {
            let evicted = self.evict_expired();
            tracing::debug!(evicted, "cache full, evicted expired entries");
            if self.entries.len() >= self.max_entries {
                return Err(CacheError::Full(self.max_entries));
            }
        }
        self.entries.insert(slot, entry);
        Ok(())
    }

    fn remove(&self, tier: Tier, key: &CacheKey) -> Result<(), CacheError> {
        self.entries.remove(&(tier, key.clone()));
        Ok(())
    }

    fn remove_where(
        &self,
        predicate: &mut dyn FnMut(Tier, &CacheKey, &CacheEntry) -> bool,
    ) -> Result<usize, CacheError> {
        let mut removed = 0;
        self.entries.retain(|(tier, key), entry| {
            if predicate(*tier, key, entry) {
                removed += 1;
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
