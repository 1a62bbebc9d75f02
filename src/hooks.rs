//! Save and delete hooks that keep computed address fields, the match index
//! and the result cache consistent with the host's member records.
//!
//! The host calls these explicitly around its own persistence:
//!
//! * [`RecomputeHook::on_before_persist`] before writing a member, and stores
//!   whatever [`ComputedFieldsUpdate`] it returns on the record.
//! * [`RecomputeHook::on_after_delete`] once a member is gone.

use std::sync::Arc;

use cache::CacheManager;
use canonical::{fingerprint, try_normalize_address_pair, Fingerprint, NormalizeConfig, NormalizedAddress};
use chrono::{DateTime, Utc};
use index::{
    CollisionHandler, ComputedFields, Confidence, IndexError, MatchIndex, MemberId, UpsertOutcome,
};
use matcher::AddressRecord;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("match index error: {0}")]
    Index(#[from] IndexError),
}

/// What the host should do with the record's computed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputedFieldsUpdate {
    /// Store these fields on the record.
    Set(ComputedFields),
    /// Remove the computed fields from the record.
    Clear,
    /// Leave the record's computed fields as they are.
    Unchanged,
}

#[derive(Clone)]
pub struct RecomputeHook {
    index: Arc<MatchIndex>,
    cache: Arc<CacheManager>,
    collisions: CollisionHandler,
    normalize: NormalizeConfig,
}

impl RecomputeHook {
    pub fn new(
        index: Arc<MatchIndex>,
        cache: Arc<CacheManager>,
        collisions: CollisionHandler,
        normalize: NormalizeConfig,
    ) -> Self {
        Self {
            index,
            cache,
            collisions,
            normalize,
        }
    }

    pub fn index(&self) -> &Arc<MatchIndex> {
        &self.index
    }

    /// Recompute `member_id`'s fields for `address`.
    ///
    /// `previous` is what the record currently carries. Normalization
    /// failures never block the save: they are logged and the member is
    /// treated as having no matchable address.
    pub fn on_before_persist(
        &self,
        member_id: &MemberId,
        address: Option<&AddressRecord>,
        previous: Option<&ComputedFields>,
    ) -> Result<ComputedFieldsUpdate, HookError> {
        self.on_before_persist_at(member_id, address, previous, Utc::now())
    }

    /// [`Self::on_before_persist`] with an explicit computation time.
    pub fn on_before_persist_at(
        &self,
        member_id: &MemberId,
        address: Option<&AddressRecord>,
        previous: Option<&ComputedFields>,
        now: DateTime<Utc>,
    ) -> Result<ComputedFieldsUpdate, HookError> {
        let Some(normalized) = address.and_then(|a| self.normalize(member_id, a)) else {
            return self.clear(member_id, previous, now);
        };

        if let Some(prev) = previous.filter(|p| p.same_location(&normalized.line, &normalized.city)) {
            match self.index.fields(member_id)? {
                Some(current) if current == *prev => return Ok(ComputedFieldsUpdate::Unchanged),
                Some(_) => {}
                // Record carries fields the index lost; restore them unless
                // another address has taken the fingerprint since.
                None => {
                    if let Some(confidence) = self.collisions.verify_fingerprint(
                        &self.index,
                        prev.fingerprint(),
                        &normalized,
                        member_id,
                    )? {
                        if let UpsertOutcome::Written { .. } =
                            self.index.upsert(member_id, prev.clone(), confidence)?
                        {
                            tracing::debug!(
                                member_id = %member_id,
                                confidence = ?confidence,
                                "index row restored from record"
                            );
                            return Ok(ComputedFieldsUpdate::Unchanged);
                        }
                    }
                }
            }
        }

        self.recompute(member_id, &normalized, previous, now)
    }

    /// Tombstone the member's row and drop every cache entry it touches.
    pub fn on_after_delete(&self, member_id: &MemberId) -> Result<(), HookError> {
        self.on_after_delete_at(member_id, Utc::now())
    }

    pub fn on_after_delete_at(
        &self,
        member_id: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<(), HookError> {
        let removed = self.index.tombstone(member_id, now)?;
        let hashes: Vec<Fingerprint> = removed.iter().map(address_hash).collect();
        self.cache.invalidate_member(member_id, &hashes);
        tracing::info!(member_id = %member_id, had_row = removed.is_some(), "member deleted");
        Ok(())
    }

    fn normalize(&self, member_id: &MemberId, address: &AddressRecord) -> Option<NormalizedAddress> {
        match try_normalize_address_pair(&address.line, &address.city, &self.normalize) {
            Ok(normalized) if normalized.is_matchable() => Some(normalized),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(
                    member_id = %member_id,
                    error = %err,
                    "address normalization failed, clearing computed fields"
                );
                None
            }
        }
    }

    fn recompute(
        &self,
        member_id: &MemberId,
        normalized: &NormalizedAddress,
        previous: Option<&ComputedFields>,
        now: DateTime<Utc>,
    ) -> Result<ComputedFieldsUpdate, HookError> {
        let resolution = self
            .collisions
            .assign_fingerprint(&self.index, normalized, member_id, now)?;
        let fields = ComputedFields::for_address(normalized, resolution.fingerprint, now)?;

        match self
            .index
            .upsert(member_id, fields.clone(), resolution.confidence)?
        {
            UpsertOutcome::Written { previous: stored } => {
                let mut hashes = vec![normalized.fingerprint.clone()];
                hashes.extend(stored.iter().chain(previous).map(address_hash));
                hashes.dedup();
                self.cache.invalidate_member(member_id, &hashes);
                tracing::info!(
                    member_id = %member_id,
                    fingerprint = %fields.fingerprint(),
                    confidence = ?resolution.confidence,
                    "computed address fields updated"
                );
                Ok(ComputedFieldsUpdate::Set(fields))
            }
            UpsertOutcome::Stale { current } => {
                tracing::warn!(
                    member_id = %member_id,
                    current = %current,
                    attempted = %now,
                    "newer index row exists, keeping it"
                );
                Ok(match self.index.fields(member_id)? {
                    Some(live) if Some(&live) == previous => ComputedFieldsUpdate::Unchanged,
                    Some(live) => ComputedFieldsUpdate::Set(live),
                    None => ComputedFieldsUpdate::Clear,
                })
            }
        }
    }

    fn clear(
        &self,
        member_id: &MemberId,
        previous: Option<&ComputedFields>,
        now: DateTime<Utc>,
    ) -> Result<ComputedFieldsUpdate, HookError> {
        let removed = self.index.tombstone(member_id, now)?;
        let hashes: Vec<Fingerprint> = removed.iter().chain(previous).map(address_hash).collect();
        self.cache.invalidate_member(member_id, &hashes);

        if removed.is_some() || previous.is_some() {
            tracing::info!(member_id = %member_id, "address removed, computed fields cleared");
            Ok(ComputedFieldsUpdate::Clear)
        } else {
            Ok(ComputedFieldsUpdate::Unchanged)
        }
    }
}

/// Cache keys use the base fingerprint, not the stored (possibly
/// disambiguated) one.
fn address_hash(fields: &ComputedFields) -> Fingerprint {
    fingerprint(fields.normalized_line(), fields.normalized_city())
}
