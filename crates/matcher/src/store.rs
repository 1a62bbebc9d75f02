//! Read access to the host's member records.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use canonical::normalize_city;
use index::MemberId;
use thiserror::Error;

use crate::types::MemberRecord;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("record store query failed: {0}")]
    Query(String),
}

/// The external record store the matcher reads from.
#[async_trait]
pub trait MemberStore: Send + Sync {
    async fn get_member(&self, id: &MemberId) -> Result<Option<MemberRecord>, StoreError>;

    /// Records for `ids`; unknown ids are skipped.
    async fn get_members(&self, ids: &[MemberId]) -> Result<Vec<MemberRecord>, StoreError>;

    /// Members whose raw address may equal `(raw_line, raw_city)`.
    ///
    /// A superset is fine: the matcher re-normalizes every candidate and
    /// keeps exact matches only.
    async fn candidates_for_address(
        &self,
        raw_line: &str,
        raw_city: &str,
    ) -> Result<Vec<MemberRecord>, StoreError>;

    /// Up to `limit` members ordered by id, starting after `after`.
    async fn list_members(
        &self,
        after: Option<&MemberId>,
        limit: usize,
    ) -> Result<Vec<MemberRecord>, StoreError>;
}

/// Map-backed [`MemberStore`] for tests and local tooling.
///
/// Can be switched offline or slowed down to exercise failure paths.
#[derive(Default)]
pub struct InMemoryMemberStore {
    members: RwLock<BTreeMap<MemberId, MemberRecord>>,
    offline: AtomicBool,
    delay_ms: AtomicU64,
}

impl InMemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: MemberRecord) {
        let mut guard = self
            .members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(record.member_id.clone(), record);
    }

    pub fn remove(&self, id: &MemberId) -> Option<MemberRecord> {
        let mut guard = self
            .members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(id)
    }

    /// Apply `f` to the stored record, if present.
    pub fn update<F>(&self, id: &MemberId, f: F) -> Option<MemberRecord>
    where
        F: FnOnce(&mut MemberRecord),
    {
        let mut guard = self
            .members
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = guard.get_mut(id)?;
        f(record);
        Some(record.clone())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".into()));
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<MemberId, MemberRecord>> {
        self.members
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl MemberStore for InMemoryMemberStore {
    async fn get_member(&self, id: &MemberId) -> Result<Option<MemberRecord>, StoreError> {
        self.gate().await?;
        Ok(self.read().get(id).cloned())
    }

    async fn get_members(&self, ids: &[MemberId]) -> Result<Vec<MemberRecord>, StoreError> {
        self.gate().await?;
        let guard = self.read();
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn candidates_for_address(
        &self,
        _raw_line: &str,
        raw_city: &str,
    ) -> Result<Vec<MemberRecord>, StoreError> {
        self.gate().await?;
        let city = normalize_city(raw_city);
        Ok(self
            .read()
            .values()
            .filter(|m| {
                m.address
                    .as_ref()
                    .is_some_and(|a| normalize_city(&a.city) == city)
            })
            .cloned()
            .collect())
    }

    async fn list_members(
        &self,
        after: Option<&MemberId>,
        limit: usize,
    ) -> Result<Vec<MemberRecord>, StoreError> {
        self.gate().await?;
        let guard = self.read();
        let page = match after {
            Some(after) => guard
                .range::<MemberId, _>((
                    std::ops::Bound::Excluded(after),
                    std::ops::Bound::Unbounded,
                ))
                .map(|(_, m)| m.clone())
                .take(limit)
                .collect(),
            None => guard.values().take(limit).cloned().collect(),
        };
        Ok(page)
    }
}
