use canonical::{disambiguated_fingerprint, timestamp_fingerprint, Fingerprint, NormalizedAddress};
use chrono::{DateTime, Utc};

use crate::{Confidence, IndexError, MatchIndex, MemberId, DEFAULT_COLLISION_SAMPLE_SIZE};

/// Number of disambiguation counters tried before the timestamp fallback.
pub const FINGERPRINT_COUNTERS: usize = 256;

/// Final fingerprint chosen for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub fingerprint: Fingerprint,
    pub confidence: Confidence,
}

/// Detects fingerprints already held by a *different* normalized address and
/// derives a replacement.
///
/// Detection looks at a bounded sample of rows, so it is probabilistic: a
/// collision hidden behind `sample_size` same-address rows goes unnoticed.
/// Tier 1 readers re-check the normalized fields for that reason.
#[derive(Debug, Clone, Copy)]
pub struct CollisionHandler {
    sample_size: usize,
}

impl Default for CollisionHandler {
    fn default() -> Self {
        Self::new(DEFAULT_COLLISION_SAMPLE_SIZE)
    }
}

impl CollisionHandler {
    pub fn new(sample_size: usize) -> Self {
        Self {
            sample_size: sample_size.max(1),
        }
    }

    /// `true` when a sampled live row under `fp` has different normalized
    /// fields than `candidate`. Rows owned by `member` are ignored.
    pub fn detect_collision(
        &self,
        index: &MatchIndex,
        fp: &Fingerprint,
        candidate: &NormalizedAddress,
        member: &MemberId,
    ) -> Result<bool, IndexError> {
        let sample = index.sample_fingerprint(fp, self.sample_size, member)?;
        Ok(sample
            .iter()
            .any(|row| !row.fields.same_location(&candidate.line, &candidate.city)))
    }

    /// Walk the disambiguation counters for `candidate` and return the first
    /// fingerprint that is free or already used by the same address.
    ///
    /// Falls back to a timestamp-derived fingerprint with
    /// [`Confidence::Reduced`] when every counter collides.
    pub fn resolve_collision(
        &self,
        index: &MatchIndex,
        candidate: &NormalizedAddress,
        member: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<Resolution, IndexError> {
        for counter in 0..=u8::MAX {
            let fp = disambiguated_fingerprint(&candidate.line, &candidate.city, counter);
            if !self.detect_collision(index, &fp, candidate, member)? {
                tracing::debug!(
                    member_id = %member,
                    base = %candidate.fingerprint,
                    counter,
                    "fingerprint collision resolved"
                );
                return Ok(Resolution {
                    fingerprint: fp,
                    confidence: Confidence::Full,
                });
            }
        }

        let nanos = now
            .timestamp_nanos_opt()
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or_default();
        let fingerprint = timestamp_fingerprint(&candidate.line, &candidate.city, nanos);
        tracing::warn!(
            member_id = %member,
            base = %candidate.fingerprint,
            fallback = %fingerprint,
            "CollisionUnresolved: all disambiguation counters taken, using timestamp fingerprint"
        );
        Ok(Resolution {
            fingerprint,
            confidence: Confidence::Reduced,
        })
    }

    /// Base fingerprint when it is safe to use, otherwise [`Self::resolve_collision`].
    pub fn assign_fingerprint(
        &self,
        index: &MatchIndex,
        candidate: &NormalizedAddress,
        member: &MemberId,
        now: DateTime<Utc>,
    ) -> Result<Resolution, IndexError> {
        if !self.detect_collision(index, &candidate.fingerprint, candidate, member)? {
            return Ok(Resolution {
                fingerprint: candidate.fingerprint.clone(),
                confidence: Confidence::Full,
            });
        }
        tracing::info!(
            member_id = %member,
            fingerprint = %candidate.fingerprint,
            "fingerprint collision detected"
        );
        self.resolve_collision(index, candidate, member, now)
    }

    /// Re-check a fingerprint a member already carries before it goes back
    /// into the index.
    ///
    /// `None` when a different address now holds `fp`. Otherwise the
    /// confidence `fp` was originally assigned with: `Full` for the base or
    /// a counter variant, `Reduced` for anything else.
    pub fn verify_fingerprint(
        &self,
        index: &MatchIndex,
        fp: &Fingerprint,
        candidate: &NormalizedAddress,
        member: &MemberId,
    ) -> Result<Option<Confidence>, IndexError> {
        if self.detect_collision(index, fp, candidate, member)? {
            return Ok(None);
        }
        let reproducible = *fp == candidate.fingerprint
            || (0..=u8::MAX).any(|counter| {
                disambiguated_fingerprint(&candidate.line, &candidate.city, counter) == *fp
            });
        Ok(Some(if reproducible {
            Confidence::Full
        } else {
            Confidence::Reduced
        }))
    }
}
