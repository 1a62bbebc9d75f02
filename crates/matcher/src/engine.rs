use std::sync::Arc;
use std::time::Instant;

use canonical::{fingerprint, normalize_address_pair, Fingerprint};
use index::{IndexError, IndexRow, MatchIndex, MemberId, Tier};

use crate::metrics::metrics_recorder;
use crate::store::MemberStore;
use crate::types::{MatchConfig, MatchError, MatchResult, MemberRecord};


/// Normalized address of the member a lookup is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub member_id: MemberId,
    /// Fingerprint to probe in Tier 1: the stored one when computed fields
    /// exist, otherwise the base fingerprint of the raw address.
    pub fingerprint: Fingerprint,
    pub line: String,
    pub city: String,
    /// Raw address for the Tier 3 store query.
    pub raw: Option<(String, String)>,
}

impl Subject {
    /// `None` when the member has no address that normalizes to a
    /// non-empty (line, city) pair.
    pub fn from_record(member: &MemberRecord) -> Option<Self> {
        let raw = member
            .address
            .as_ref()
            .map(|a| (a.line.clone(), a.city.clone()));

        if let Some(computed) = &member.computed {
            return Some(Self {
                member_id: member.member_id.clone(),
                fingerprint: computed.fingerprint().clone(),
                line: computed.normalized_line().to_string(),
                city: computed.normalized_city().to_string(),
                raw,
            });
        }

        let (raw_line, raw_city) = raw.as_ref()?;
        let normalized = normalize_address_pair(raw_line, raw_city);
        if !normalized.is_matchable() {
            return None;
        }
        Some(Self {
            member_id: member.member_id.clone(),
            fingerprint: normalized.fingerprint,
            line: normalized.line,
            city: normalized.city,
            raw,
        })
    }

    /// Base fingerprint of the normalized pair; used as the cache key.
    pub fn address_hash(&self) -> Fingerprint {
        fingerprint(&self.line, &self.city)
    }
}

enum State {
    Start,
    TryFingerprint,
    TryNormalized,
    TryJoinFallback,
    Return(MatchResult),
}

/// Finds members sharing a subject's address, cheapest tier first.
///
/// Each tier only runs when the previous one produced no peers after
/// filtering. Index lookups run on the blocking pool under a timeout.
pub struct TieredMatcher {
    index: Arc<MatchIndex>,
    store: Arc<dyn MemberStore>,
    cfg: MatchConfig,
}

impl TieredMatcher {
    pub fn new(
        index: Arc<MatchIndex>,
        store: Arc<dyn MemberStore>,
        cfg: MatchConfig,
    ) -> Result<Self, MatchError> {
        cfg.validate()?;
        Ok(Self { index, store, cfg })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.cfg
    }

    pub fn index(&self) -> &Arc<MatchIndex> {
        &self.index
    }

    pub fn store(&self) -> &Arc<dyn MemberStore> {
        &self.store
    }

    /// Look up peers of `member`. Returns `Ok(None)` when the member has no
    /// matchable address.
    pub async fn find_matches(
        &self,
        member: &MemberRecord,
    ) -> Result<Option<MatchResult>, MatchError> {
        match Subject::from_record(member) {
            Some(subject) => self.find_for_subject(&subject).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn find_for_subject(&self, subject: &Subject) -> Result<MatchResult, MatchError> {
        let start = Instant::now();
        let mut state = State::Start;
        let result = loop {
            state = match state {
                State::Start => State::TryFingerprint,
                State::TryFingerprint => {
                    let peers = self.fingerprint_tier(subject).await?;
                    self.advance(Tier::Fingerprint, peers, State::TryNormalized)
                }
                State::TryNormalized => {
                    let peers = self.normalized_tier(subject).await?;
                    self.advance(Tier::Normalized, peers, State::TryJoinFallback)
                }
                State::TryJoinFallback => {
                    let peers = self.join_tier(subject).await?;
                    State::Return(MatchResult {
                        tier: Tier::JoinFallback,
                        members: peers,
                    })
                }
                State::Return(result) => break result,
            };
        };

        let latency = start.elapsed();
        tracing::debug!(
            member_id = %subject.member_id,
            tier = %result.tier,
            hits = result.members.len(),
            latency_ms = latency.as_millis() as u64,
            "household lookup finished"
        );
        if let Some(recorder) = metrics_recorder() {
            recorder.record_lookup(result.tier, latency, result.members.len());
        }
        Ok(result)
    }

    fn advance(&self, tier: Tier, peers: Vec<MemberRecord>, next: State) -> State {
        if peers.is_empty() {
            next
        } else {
            State::Return(MatchResult {
                tier,
                members: peers,
            })
        }
    }

    async fn fingerprint_tier(&self, subject: &Subject) -> Result<Vec<MemberRecord>, MatchError> {
        let fp = subject.fingerprint.clone();
        let rows = self
            .indexed(Tier::Fingerprint, move |index| index.lookup_fingerprint(&fp))
            .await?;
        // An undetected collision can put another address under this
        // fingerprint; only rows with identical normalized fields count.
        let ids = rows
            .into_iter()
            .filter(|row| row.fields.same_location(&subject.line, &subject.city))
            .map(|row| row.member_id);
        self.load_peers(subject, ids).await
    }

    async fn normalized_tier(&self, subject: &Subject) -> Result<Vec<MemberRecord>, MatchError> {
        let (line, city) = (subject.line.clone(), subject.city.clone());
        let rows = self
            .indexed(Tier::Normalized, move |index| {
                index.lookup_normalized(&line, &city)
            })
            .await?;
        // A row can be rewritten before the map it was found through.
        let ids = rows
            .into_iter()
            .filter(|row| row.fields.same_location(&subject.line, &subject.city))
            .map(|row| row.member_id);
        self.load_peers(subject, ids).await
    }

    async fn join_tier(&self, subject: &Subject) -> Result<Vec<MemberRecord>, MatchError> {
        let Some((raw_line, raw_city)) = &subject.raw else {
            return Ok(Vec::new());
        };
        let query = self.store.candidates_for_address(raw_line, raw_city);
        let candidates = tokio::time::timeout(self.cfg.join_timeout(), query)
            .await
            .map_err(|_| MatchError::Timeout {
                tier: Tier::JoinFallback,
                after_ms: self.cfg.join_timeout_ms,
            })??;

        let matching = candidates
            .into_iter()
            .filter(|candidate| {
                candidate.address.as_ref().is_some_and(|a| {
                    let normalized = normalize_address_pair(&a.line, &a.city);
                    normalized.same_location(&subject.line, &subject.city)
                })
            })
            .collect();
        Ok(self.finalize(subject, matching))
    }

    /// Run an index call on the blocking pool. A timeout is a miss.
    async fn indexed<F>(&self, tier: Tier, call: F) -> Result<Vec<IndexRow>, MatchError>
    where
        F: FnOnce(&MatchIndex) -> Result<Vec<IndexRow>, IndexError> + Send + 'static,
    {
        let index = Arc::clone(&self.index);
        let task = tokio::task::spawn_blocking(move || call(&index));
        match tokio::time::timeout(self.cfg.index_timeout(), task).await {
            Ok(Ok(rows)) => Ok(rows?),
            Ok(Err(join)) => Err(MatchError::Task(join.to_string())),
            Err(_) => {
                tracing::warn!(
                    tier = %tier,
                    after_ms = self.cfg.index_timeout_ms,
                    "index lookup timed out, treating as miss"
                );
                if let Some(recorder) = metrics_recorder() {
                    recorder.record_timeout(tier);
                }
                Ok(Vec::new())
            }
        }
    }

    async fn load_peers(
        &self,
        subject: &Subject,
        ids: impl Iterator<Item = MemberId>,
    ) -> Result<Vec<MemberRecord>, MatchError> {
        let ids: Vec<MemberId> = ids.filter(|id| *id != subject.member_id).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = self.store.get_members(&ids).await?;
        Ok(self.finalize(subject, records))
    }

    /// Drop the subject and inactive members, order by association date
    /// then id, and cap.
    fn finalize(&self, subject: &Subject, mut members: Vec<MemberRecord>) -> Vec<MemberRecord> {
        members.retain(|m| m.member_id != subject.member_id && self.cfg.is_active(m.status));
        members.sort_by(|a, b| {
            a.member_since
                .cmp(&b.member_since)
                .then_with(|| a.member_id.cmp(&b.member_id))
        });
        members.dedup_by(|a, b| a.member_id == b.member_id);
        members.truncate(self.cfg.max_results);
        members
    }
}
