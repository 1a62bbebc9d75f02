//! # Address match index
//!
//! Persists one row per member holding the member's computed address fields
//! and keeps two in-memory secondary maps over the live rows:
//!
//! - fingerprint → members (Tier 1 point lookup)
//! - (normalized line, normalized city) → members (Tier 2 composite lookup)
//!
//! Rows go through a pluggable [`IndexBackend`] (in-memory or redb) encoded
//! with bincode. The secondary maps are rebuilt from a backend scan when the
//! index is opened.
//!
//! [`CollisionHandler`] sits on top of the index and picks a final
//! fingerprint for an address before it is written.
//!
//! ```
//! use canonical::normalize_address_pair;
//! use chrono::Utc;
//! use index::{ComputedFields, Confidence, IndexConfig, MatchIndex, MemberId};
//!
//! let index = MatchIndex::new(&IndexConfig::default()).unwrap();
//! let addr = normalize_address_pair("Kerkstr. 12", "Utrecht");
//! let fields = ComputedFields::for_address(&addr, addr.fingerprint.clone(), Utc::now()).unwrap();
//! index.upsert(&MemberId::new("m-1"), fields, Confidence::Full).unwrap();
//!
//! let rows = index.lookup_fingerprint(&addr.fingerprint).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

mod backend;
mod collision;
mod types;

pub use backend::{BackendConfig, InMemoryBackend, IndexBackend};
#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use collision::{CollisionHandler, Resolution, FINGERPRINT_COUNTERS};
pub use types::{
    ComputedFields, Confidence, IndexRow, MemberId, RawComputedFields, Tier, UpsertOutcome,
};

use bincode::config::standard;
use bincode::error::{DecodeError, EncodeError};
use bincode::serde::{decode_from_slice, encode_to_vec};
use canonical::Fingerprint;
use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::{Mutex, RwLock};
use thiserror::Error;

/// Bump whenever the encoded [`IndexRow`] layout changes.
pub const INDEX_SCHEMA_VERSION: u16 = 1;

pub const DEFAULT_COLLISION_SAMPLE_SIZE: usize = 5;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub backend: BackendConfig,
    /// Rows sampled per fingerprint when checking for a collision.
    pub collision_sample_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            collision_sample_size: DEFAULT_COLLISION_SAMPLE_SIZE,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_collision_sample_size(mut self, size: usize) -> Self {
        self.collision_sample_size = size;
        self
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        if self.collision_sample_size == 0 {
            return Err(IndexError::InvalidConfig(
                "collision_sample_size must be at least 1".into(),
            ));
        }
        self.backend.validate()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization encode error: {0}")]
    Encode(String),
    #[error("serialization decode error: {0}")]
    Decode(String),
    #[error("invalid computed fields: {0}")]
    InvalidFields(String),
    #[error("invalid index config: {0}")]
    InvalidConfig(String),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}

type MemberSet = BTreeSet<MemberId>;

pub struct MatchIndex {
    backend: Box<dyn IndexBackend>,
    /// Serializes read-modify-write of a row plus its map entries.
    write_lock: Mutex<()>,
    by_fingerprint: RwLock<HashMap<Fingerprint, MemberSet>>,
    by_normalized: RwLock<HashMap<(String, String), MemberSet>>,
}

impl MatchIndex {
    /// Build the configured backend and load its rows.
    pub fn new(cfg: &IndexConfig) -> Result<Self, IndexError> {
        cfg.validate()?;
        Self::with_backend(cfg.backend.build()?)
    }

    /// Open an index over an existing backend, rebuilding the secondary maps.
    pub fn with_backend(backend: Box<dyn IndexBackend>) -> Result<Self, IndexError> {
        let index = Self {
            backend,
            write_lock: Mutex::new(()),
            by_fingerprint: RwLock::new(HashMap::new()),
            by_normalized: RwLock::new(HashMap::new()),
        };
        index.rebuild_maps()?;
        Ok(index)
    }

    fn rebuild_maps(&self) -> Result<(), IndexError> {
        let mut live = Vec::new();
        self.backend.scan(&mut |_, data| {
            let row = decode_row(data)?;
            if row.is_live() {
                live.push(row);
            }
            Ok(())
        })?;
        for row in &live {
            self.insert_maps(&row.member_id, &row.fields)?;
        }
        tracing::debug!(rows = live.len(), "match index loaded");
        Ok(())
    }

    pub fn get(&self, member: &MemberId) -> Result<Option<IndexRow>, IndexError> {
        match self.backend.get(member.as_str())? {
            Some(data) => Ok(Some(decode_row(&data)?)),
            None => Ok(None),
        }
    }

    /// Live computed fields for `member`, if any.
    pub fn fields(&self, member: &MemberId) -> Result<Option<ComputedFields>, IndexError> {
        Ok(self
            .get(member)?
            .filter(IndexRow::is_live)
            .map(|row| row.fields))
    }

    /// Write `fields` for `member` unless the stored row is newer.
    ///
    /// Equal `last_computed_at` timestamps overwrite. A tombstone blocks
    /// writes computed at or before the deletion.
    pub fn upsert(
        &self,
        member: &MemberId,
        fields: ComputedFields,
        confidence: Confidence,
    ) -> Result<UpsertOutcome, IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| IndexError::backend("poisoned lock"))?;

        let existing = self.get(member)?;
        if let Some(row) = &existing {
            match row.deleted_at {
                Some(deleted) if deleted >= fields.last_computed_at() => {
                    return Ok(UpsertOutcome::Stale { current: deleted });
                }
                None if row.fields.last_computed_at() > fields.last_computed_at() => {
                    return Ok(UpsertOutcome::Stale {
                        current: row.fields.last_computed_at(),
                    });
                }
                _ => {}
            }
        }

        let row = IndexRow {
            schema_version: INDEX_SCHEMA_VERSION,
            member_id: member.clone(),
            fields,
            confidence,
            deleted_at: None,
        };
        self.backend.put(member.as_str(), &encode_row(&row)?)?;

        let previous = existing.filter(IndexRow::is_live).map(|r| r.fields);
        if let Some(prev) = &previous {
            self.remove_maps(member, prev)?;
        }
        self.insert_maps(member, &row.fields)?;

        tracing::debug!(
            member_id = %member,
            fingerprint = %row.fields.fingerprint(),
            confidence = ?confidence,
            "index row written"
        );
        Ok(UpsertOutcome::Written { previous })
    }

    /// Mark the member's row deleted. Returns the fields that were live, or
    /// `None` when there was no live row.
    pub fn tombstone(
        &self,
        member: &MemberId,
        at: DateTime<Utc>,
    ) -> Result<Option<ComputedFields>, IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| IndexError::backend("poisoned lock"))?;

        let Some(mut row) = self.get(member)? else {
            return Ok(None);
        };
        if !row.is_live() {
            return Ok(None);
        }
        row.deleted_at = Some(at);
        self.backend.put(member.as_str(), &encode_row(&row)?)?;
        self.remove_maps(member, &row.fields)?;
        tracing::debug!(member_id = %member, "index row tombstoned");
        Ok(Some(row.fields))
    }

    /// Tier 1: live rows stored under `fp`, ordered by member id.
    pub fn lookup_fingerprint(&self, fp: &Fingerprint) -> Result<Vec<IndexRow>, IndexError> {
        let members = {
            let map = self
                .by_fingerprint
                .read()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            map.get(fp).cloned().unwrap_or_default()
        };
        self.load_live(members.iter(), usize::MAX)
    }

    /// Tier 2: live rows whose normalized fields equal `(line, city)`.
    pub fn lookup_normalized(&self, line: &str, city: &str) -> Result<Vec<IndexRow>, IndexError> {
        let members = {
            let map = self
                .by_normalized
                .read()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            map.get(&(line.to_string(), city.to_string()))
                .cloned()
                .unwrap_or_default()
        };
        self.load_live(members.iter(), usize::MAX)
    }

    /// Up to `limit` live rows under `fp`, skipping `exclude`.
    pub fn sample_fingerprint(
        &self,
        fp: &Fingerprint,
        limit: usize,
        exclude: &MemberId,
    ) -> Result<Vec<IndexRow>, IndexError> {
        let members = {
            let map = self
                .by_fingerprint
                .read()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            map.get(fp).cloned().unwrap_or_default()
        };
        self.load_live(members.iter().filter(|m| *m != exclude), limit)
    }

    /// Delete tombstoned rows whose deletion is older than `older_than`.
    pub fn purge_tombstones(&self, older_than: DateTime<Utc>) -> Result<usize, IndexError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| IndexError::backend("poisoned lock"))?;

        let mut expired = Vec::new();
        self.backend.scan(&mut |key, data| {
            let row = decode_row(data)?;
            if matches!(row.deleted_at, Some(at) if at < older_than) {
                expired.push(key.to_string());
            }
            Ok(())
        })?;
        for key in &expired {
            self.backend.delete(key)?;
        }
        self.backend.flush()?;
        tracing::info!(purged = expired.len(), "tombstones purged");
        Ok(expired.len())
    }

    /// Visit every stored row, tombstones included.
    pub fn scan(
        &self,
        visitor: &mut dyn FnMut(&IndexRow) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        self.backend.scan(&mut |_, data| {
            let row = decode_row(data)?;
            visitor(&row)
        })
    }

    pub fn live_count(&self) -> Result<usize, IndexError> {
        let map = self
            .by_normalized
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        Ok(map.values().map(BTreeSet::len).sum())
    }

    pub fn flush(&self) -> Result<(), IndexError> {
        self.backend.flush()
    }

    fn load_live<'a>(
        &self,
        members: impl Iterator<Item = &'a MemberId>,
        limit: usize,
    ) -> Result<Vec<IndexRow>, IndexError> {
        let mut rows = Vec::new();
        for member in members {
            if rows.len() >= limit {
                break;
            }
            // A row can be tombstoned between the map read and this get.
            if let Some(row) = self.get(member)?.filter(IndexRow::is_live) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn insert_maps(&self, member: &MemberId, fields: &ComputedFields) -> Result<(), IndexError> {
        self.by_fingerprint
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .entry(fields.fingerprint().clone())
            .or_default()
            .insert(member.clone());
        self.by_normalized
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?
            .entry(normalized_key(fields))
            .or_default()
            .insert(member.clone());
        Ok(())
    }

    fn remove_maps(&self, member: &MemberId, fields: &ComputedFields) -> Result<(), IndexError> {
        {
            let mut map = self
                .by_fingerprint
                .write()
                .map_err(|_| IndexError::backend("poisoned lock"))?;
            if let Some(set) = map.get_mut(fields.fingerprint()) {
                set.remove(member);
                if set.is_empty() {
                    map.remove(fields.fingerprint());
                }
            }
        }
        let mut map = self
            .by_normalized
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))?;
        let key = normalized_key(fields);
        if let Some(set) = map.get_mut(&key) {
            set.remove(member);
            if set.is_empty() {
                map.remove(&key);
            }
        }
        Ok(())
    }
}

fn normalized_key(fields: &ComputedFields) -> (String, String) {
    (
        fields.normalized_line().to_string(),
        fields.normalized_city().to_string(),
    )
}

fn encode_row(row: &IndexRow) -> Result<Vec<u8>, IndexError> {
    Ok(encode_to_vec(row, standard())?)
}

fn decode_row(data: &[u8]) -> Result<IndexRow, IndexError> {
    let (row, _) = decode_from_slice(data, standard())?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use canonical::normalize_address_pair;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    fn fields(line: &str, city: &str, secs: i64) -> ComputedFields {
        let addr = normalize_address_pair(line, city);
        ComputedFields::for_address(&addr, addr.fingerprint.clone(), at(secs)).unwrap()
    }

    fn index() -> MatchIndex {
        MatchIndex::with_backend(Box::new(InMemoryBackend::new())).unwrap()
    }

    fn ids(rows: &[IndexRow]) -> Vec<&str> {
        rows.iter().map(|r| r.member_id.as_str()).collect()
    }

    #[test]
    fn decoding_a_row_with_blank_fields_fails() {
        #[derive(Serialize)]
        struct StoredRow {
            schema_version: u16,
            member_id: MemberId,
            fields: RawComputedFields,
            confidence: Confidence,
            deleted_at: Option<DateTime<Utc>>,
        }

        let good = fields("Kerkstraat 12", "Utrecht", 10);
        let mut stored = StoredRow {
            schema_version: INDEX_SCHEMA_VERSION,
            member_id: "m-1".into(),
            fields: RawComputedFields::from(&good),
            confidence: Confidence::Full,
            deleted_at: None,
        };
        let row = decode_row(&encode_to_vec(&stored, standard()).unwrap()).unwrap();
        assert_eq!(row.fields, good);

        stored.fields.normalized_line = Some(String::new());
        stored.fields.normalized_city = Some(String::new());
        let err = decode_row(&encode_to_vec(&stored, standard()).unwrap()).unwrap_err();
        assert!(matches!(err, IndexError::Decode(_)));
    }

    #[test]
    fn upsert_then_lookup_both_tiers() {
        let index = index();
        let f = fields("Kerkstraat 12", "Utrecht", 10);
        index
            .upsert(&"m-1".into(), f.clone(), Confidence::Full)
            .unwrap();
        index
            .upsert(&"m-2".into(), fields("kerkstr. 12", "utrecht", 11), Confidence::Full)
            .unwrap();

        let tier1 = index.lookup_fingerprint(f.fingerprint()).unwrap();
        assert_eq!(ids(&tier1), vec!["m-1", "m-2"]);
        let tier2 = index
            .lookup_normalized("kerkstraat 12", "utrecht")
            .unwrap();
        assert_eq!(ids(&tier2), vec!["m-1", "m-2"]);
        assert_eq!(index.live_count().unwrap(), 2);
    }

    #[test]
    fn stale_upsert_rejected_and_equal_timestamp_accepted() {
        let index = index();
        let member: MemberId = "m-1".into();
        index
            .upsert(&member, fields("Dorpsstraat 1", "Ede", 20), Confidence::Full)
            .unwrap();

        let stale = index
            .upsert(&member, fields("Kerkstraat 12", "Utrecht", 19), Confidence::Full)
            .unwrap();
        assert_eq!(stale, UpsertOutcome::Stale { current: at(20) });
        assert_eq!(
            index.fields(&member).unwrap().unwrap().normalized_line(),
            "dorpsstraat 1"
        );

        let same = index
            .upsert(&member, fields("Kerkstraat 12", "Utrecht", 20), Confidence::Full)
            .unwrap();
        assert!(matches!(same, UpsertOutcome::Written { previous: Some(_) }));
        assert!(index
            .lookup_normalized("dorpsstraat 1", "ede")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn tombstoned_rows_disappear_from_lookups() {
        let index = index();
        let member: MemberId = "m-1".into();
        let f = fields("Kerkstraat 12", "Utrecht", 10);
        index.upsert(&member, f.clone(), Confidence::Full).unwrap();

        assert_eq!(index.tombstone(&member, at(30)).unwrap(), Some(f.clone()));
        assert!(index.lookup_fingerprint(f.fingerprint()).unwrap().is_empty());
        assert!(index.fields(&member).unwrap().is_none());
        assert_eq!(index.tombstone(&member, at(31)).unwrap(), None);

        // A recompute from before the deletion must not resurrect the row.
        let late = index
            .upsert(&member, fields("Kerkstraat 12", "Utrecht", 25), Confidence::Full)
            .unwrap();
        assert_eq!(late, UpsertOutcome::Stale { current: at(30) });
    }

    #[test]
    fn purge_removes_only_old_tombstones() {
        let index = index();
        index
            .upsert(&"old".into(), fields("A 1", "Ede", 1), Confidence::Full)
            .unwrap();
        index
            .upsert(&"new".into(), fields("B 2", "Ede", 1), Confidence::Full)
            .unwrap();
        index
            .upsert(&"live".into(), fields("C 3", "Ede", 1), Confidence::Full)
            .unwrap();
        index.tombstone(&"old".into(), at(100)).unwrap();
        index.tombstone(&"new".into(), at(500)).unwrap();

        assert_eq!(index.purge_tombstones(at(200)).unwrap(), 1);
        assert!(index.get(&"old".into()).unwrap().is_none());
        assert!(index.get(&"new".into()).unwrap().is_some());
        assert!(index.get(&"live".into()).unwrap().is_some());
    }

    #[test]
    fn sample_excludes_member_and_respects_limit() {
        let index = index();
        let f = fields("Kerkstraat 12", "Utrecht", 1);
        for id in ["a", "b", "c", "d"] {
            index.upsert(&id.into(), f.clone(), Confidence::Full).unwrap();
        }
        let sample = index
            .sample_fingerprint(f.fingerprint(), 2, &"a".into())
            .unwrap();
        assert_eq!(ids(&sample), vec!["b", "c"]);
    }

    #[test]
    fn maps_rebuilt_on_reopen() {
        use std::sync::Arc;

        struct Shared(Arc<InMemoryBackend>);
        impl IndexBackend for Shared {
            fn put(&self, key: &str, value: &[u8]) -> Result<(), IndexError> {
                self.0.put(key, value)
            }
            fn get(&self, key: &str) -> Result<Option<Vec<u8>>, IndexError> {
                self.0.get(key)
            }
            fn delete(&self, key: &str) -> Result<(), IndexError> {
                self.0.delete(key)
            }
            fn scan(
                &self,
                visitor: &mut dyn FnMut(&str, &[u8]) -> Result<(), IndexError>,
            ) -> Result<(), IndexError> {
                self.0.scan(visitor)
            }
        }

        let storage = Arc::new(InMemoryBackend::new());
        let f = fields("Kerkstraat 12", "Utrecht", 1);
        {
            let index = MatchIndex::with_backend(Box::new(Shared(storage.clone()))).unwrap();
            index.upsert(&"m-1".into(), f.clone(), Confidence::Full).unwrap();
            index.upsert(&"m-2".into(), f.clone(), Confidence::Full).unwrap();
            index.tombstone(&"m-2".into(), at(5)).unwrap();
        }

        let reopened = MatchIndex::with_backend(Box::new(Shared(storage))).unwrap();
        assert_eq!(ids(&reopened.lookup_fingerprint(f.fingerprint()).unwrap()), vec!["m-1"]);
    }

    #[cfg(feature = "backend-redb")]
    #[test]
    fn redb_index_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.redb");
        let cfg = IndexConfig::new().with_backend(BackendConfig::redb(path.to_string_lossy()));
        let f = fields("Dorpsstraat 1", "Ede", 3);
        {
            let index = MatchIndex::new(&cfg).unwrap();
            index.upsert(&"m-1".into(), f.clone(), Confidence::Reduced).unwrap();
        }
        let index = MatchIndex::new(&cfg).unwrap();
        let row = index.get(&"m-1".into()).unwrap().unwrap();
        assert_eq!(row.fields, f);
        assert_eq!(row.confidence, Confidence::Reduced);
        assert_eq!(row.schema_version, INDEX_SCHEMA_VERSION);
    }

    #[test]
    fn config_validation() {
        assert!(IndexConfig::default().validate().is_ok());
        assert!(IndexConfig::new()
            .with_collision_sample_size(0)
            .validate()
            .is_err());
    }
}
