use std::collections::HashMap;
use std::sync::Arc;

use cache::{CacheKey, CacheManager, CacheValue};
use chrono::{NaiveDate, Utc};
use index::{CollisionHandler, Confidence, MatchIndex, MemberId};
use matcher::{
    AgeGroup, Classifier, HouseholdClassifier, MatchError, MemberRecord, MemberStore,
    Relationship, Subject, TieredMatcher,
};
use serde::{Deserialize, Serialize};

use crate::config::{AddrMatchConfig, MaintenanceConfig};
use crate::hooks::{ComputedFieldsUpdate, HookError, RecomputeHook};
use crate::AddrMatchError;

/// A peer sharing the subject's address, labelled for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedMember {
    pub member_id: MemberId,
    pub full_name: Option<String>,
    pub member_since: NaiveDate,
    pub relationship: Relationship,
    pub age_group: Option<AgeGroup>,
}

impl RelatedMember {
    pub fn relationship_label(&self) -> &'static str {
        self.relationship.label()
    }
}

/// Outcome of a related-member lookup.
///
/// `Unavailable` means the record store could not be queried. It is distinct
/// from `Found` with an empty list, which is a definite "no one else lives
/// here".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelatedMembers {
    Found(Vec<RelatedMember>),
    Unavailable,
}

impl RelatedMembers {
    pub fn members(&self) -> Option<&[RelatedMember]> {
        match self {
            RelatedMembers::Found(members) => Some(members),
            RelatedMembers::Unavailable => None,
        }
    }

    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members()
            .unwrap_or_default()
            .iter()
            .map(|m| m.member_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub scanned: usize,
    /// Members that received new computed fields.
    pub computed: usize,
    /// Members whose stale fields were cleared because they have no
    /// matchable address.
    pub cleared: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Members that fell back to a timestamp fingerprint.
    pub reduced_confidence: usize,
    /// Resume point for the next batch; `None` once the store is exhausted.
    pub next_cursor: Option<MemberId>,
}

impl BackfillReport {
    fn absorb(&mut self, batch: &BackfillReport) {
        self.scanned += batch.scanned;
        self.computed += batch.computed;
        self.cleared += batch.cleared;
        self.skipped += batch.skipped;
        self.failed += batch.failed;
        self.reduced_confidence += batch.reduced_confidence;
        self.next_cursor = batch.next_cursor.clone();
    }
}

/// One page of backfill work plus the field updates the host should write
/// back to its records.
#[derive(Debug, Clone, Default)]
pub struct BackfillBatch {
    pub report: BackfillReport,
    pub updates: Vec<(MemberId, ComputedFieldsUpdate)>,
}

/// Household lookups, backfill and index maintenance over one record store.
pub struct AddressMatchService {
    matcher: TieredMatcher,
    cache: Arc<CacheManager>,
    hook: RecomputeHook,
    classifier: Arc<dyn Classifier>,
    maintenance: MaintenanceConfig,
}

impl AddressMatchService {
    /// Open the configured index backend and build every component.
    pub fn new(cfg: &AddrMatchConfig, store: Arc<dyn MemberStore>) -> Result<Self, AddrMatchError> {
        cfg.validate()?;
        let index = Arc::new(MatchIndex::new(&cfg.index)?);
        let cache = Arc::new(CacheManager::new(cfg.cache));
        Self::with_components(cfg, index, cache, store)
    }

    /// Build the service over an existing index and cache.
    pub fn with_components(
        cfg: &AddrMatchConfig,
        index: Arc<MatchIndex>,
        cache: Arc<CacheManager>,
        store: Arc<dyn MemberStore>,
    ) -> Result<Self, AddrMatchError> {
        cfg.validate()?;
        let hook = RecomputeHook::new(
            index.clone(),
            cache.clone(),
            CollisionHandler::new(cfg.index.collision_sample_size),
            cfg.normalize.clone(),
        );
        let matcher = TieredMatcher::new(index, store, cfg.matcher.clone())?;
        Ok(Self {
            matcher,
            cache,
            hook,
            classifier: Arc::new(HouseholdClassifier),
            maintenance: cfg.maintenance,
        })
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn hook(&self) -> &RecomputeHook {
        &self.hook
    }

    pub fn matcher(&self) -> &TieredMatcher {
        &self.matcher
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn index(&self) -> &Arc<MatchIndex> {
        self.matcher.index()
    }

    fn store(&self) -> &Arc<dyn MemberStore> {
        self.matcher.store()
    }

    /// Members sharing `member_id`'s address, cache first.
    ///
    /// Store failures and Tier 3 timeouts yield [`RelatedMembers::Unavailable`].
    /// A member without a matchable address has no relations.
    pub async fn find_related_members(
        &self,
        member_id: &MemberId,
    ) -> Result<RelatedMembers, AddrMatchError> {
        let subject_record = match self.store().get_member(member_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return Err(AddrMatchError::UnknownMember(member_id.clone())),
            Err(err) => {
                tracing::warn!(member_id = %member_id, error = %err, "subject lookup failed");
                return Ok(RelatedMembers::Unavailable);
            }
        };
        let Some(subject) = Subject::from_record(&subject_record) else {
            return Ok(RelatedMembers::Found(Vec::new()));
        };

        let key = CacheKey::new(member_id.clone(), subject.address_hash());
        let peers = match self.cache.lookup(&key) {
            Some(hit) => match self.load_cached(&hit).await {
                Ok(peers) => peers,
                Err(err) => {
                    tracing::warn!(member_id = %member_id, error = %err, "cached peers unavailable");
                    return Ok(RelatedMembers::Unavailable);
                }
            },
            None => match self.matcher.find_for_subject(&subject).await {
                Ok(result) => {
                    self.cache
                        .store(key, CacheValue::new(result.tier, result.member_ids()));
                    result.members
                }
                Err(err @ (MatchError::Store(_) | MatchError::Timeout { .. })) => {
                    tracing::warn!(member_id = %member_id, error = %err, "household lookup unavailable");
                    return Ok(RelatedMembers::Unavailable);
                }
                Err(err) => return Err(err.into()),
            },
        };

        let today = Utc::now().date_naive();
        let related = peers
            .iter()
            .map(|peer| RelatedMember {
                member_id: peer.member_id.clone(),
                full_name: peer.full_name.clone(),
                member_since: peer.member_since,
                relationship: self.classifier.relationship(&subject_record, peer),
                age_group: self.classifier.age_group(peer, today),
            })
            .collect();
        Ok(RelatedMembers::Found(related))
    }

    /// Reload cached peers in cached order. Status may have changed since
    /// the entry was written, so the active filter runs again.
    async fn load_cached(&self, hit: &CacheValue) -> Result<Vec<MemberRecord>, AddrMatchError> {
        if hit.is_negative() {
            return Ok(Vec::new());
        }
        let position: HashMap<&MemberId, usize> =
            hit.members.iter().enumerate().map(|(i, id)| (id, i)).collect();
        let mut peers = self.store().get_members(&hit.members).await?;
        peers.retain(|p| self.matcher.config().is_active(p.status));
        peers.sort_by_key(|p| position.get(&p.member_id).copied().unwrap_or(usize::MAX));
        tracing::debug!(tier = %hit.tier, peers = peers.len(), "household served from cache");
        Ok(peers)
    }

    /// Compute fields for every member in the store, batch by batch.
    pub async fn backfill_computed_fields(
        &self,
        batch_size: usize,
    ) -> Result<BackfillReport, AddrMatchError> {
        let mut total = BackfillReport::default();
        let mut cursor: Option<MemberId> = None;
        loop {
            let batch = self.backfill_batch(cursor.as_ref(), batch_size).await?;
            total.absorb(&batch.report);
            match batch.report.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        tracing::info!(
            scanned = total.scanned,
            computed = total.computed,
            cleared = total.cleared,
            skipped = total.skipped,
            failed = total.failed,
            reduced_confidence = total.reduced_confidence,
            "backfill finished"
        );
        Ok(total)
    }

    /// [`Self::backfill_computed_fields`] using the configured batch size.
    pub async fn backfill(&self) -> Result<BackfillReport, AddrMatchError> {
        self.backfill_computed_fields(self.maintenance.backfill_batch_size)
            .await
    }

    /// Process one page of members after `after`.
    ///
    /// Per-member failures are counted and skipped; only a failed page read
    /// aborts the batch.
    pub async fn backfill_batch(
        &self,
        after: Option<&MemberId>,
        batch_size: usize,
    ) -> Result<BackfillBatch, AddrMatchError> {
        let batch_size = batch_size.max(1);
        let members = self.store().list_members(after, batch_size).await?;
        let next_cursor = if members.len() < batch_size {
            None
        } else {
            members.last().map(|m| m.member_id.clone())
        };

        let hook = self.hook.clone();
        let mut batch = tokio::task::spawn_blocking(move || recompute_page(&hook, members))
            .await
            .map_err(|err| AddrMatchError::Task(err.to_string()))?;
        batch.report.next_cursor = next_cursor;

        tracing::debug!(
            scanned = batch.report.scanned,
            computed = batch.report.computed,
            failed = batch.report.failed,
            "backfill batch done"
        );
        Ok(batch)
    }

    /// Drop tombstones older than the configured retention. Meant for an
    /// offline job, not the request path.
    pub async fn purge_tombstones(&self) -> Result<usize, AddrMatchError> {
        let retention = chrono::Duration::days(i64::from(self.maintenance.tombstone_retention_days));
        let cutoff = Utc::now() - retention;
        let index = Arc::clone(self.index());
        let purged = tokio::task::spawn_blocking(move || index.purge_tombstones(cutoff))
            .await
            .map_err(|err| AddrMatchError::Task(err.to_string()))??;
        Ok(purged)
    }
}

fn recompute_page(hook: &RecomputeHook, members: Vec<MemberRecord>) -> BackfillBatch {
    let mut batch = BackfillBatch::default();
    for member in members {
        batch.report.scanned += 1;
        let id = &member.member_id;
        let outcome = hook
            .on_before_persist(id, member.address.as_ref(), member.computed.as_ref())
            .and_then(|update| {
                let reduced = match &update {
                    ComputedFieldsUpdate::Set(_) => hook
                        .index()
                        .get(id)?
                        .is_some_and(|row| row.confidence == Confidence::Reduced),
                    _ => false,
                };
                Ok::<_, HookError>((update, reduced))
            });

        match outcome {
            Ok((update, reduced)) => {
                match &update {
                    ComputedFieldsUpdate::Set(_) => batch.report.computed += 1,
                    ComputedFieldsUpdate::Clear => batch.report.cleared += 1,
                    ComputedFieldsUpdate::Unchanged => {
                        batch.report.skipped += 1;
                        continue;
                    }
                }
                if reduced {
                    batch.report.reduced_confidence += 1;
                }
                batch.updates.push((member.member_id.clone(), update));
            }
            Err(err) => {
                batch.report.failed += 1;
                tracing::warn!(member_id = %id, error = %err, "backfill failed for member");
            }
        }
    }
    batch
}
