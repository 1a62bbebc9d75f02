//! # Address matcher (`matcher`)
//!
//! Finds members who share a subject member's postal address by trying three
//! lookup tiers in order and stopping at the first that yields peers:
//!
//! 1. **Fingerprint**: point lookup on the stored address fingerprint, with
//!    the normalized fields re-checked so an undetected collision never
//!    leaks a foreign address.
//! 2. **Normalized**: composite lookup on (normalized line, normalized city).
//! 3. **Join fallback**: asks the [`MemberStore`] for raw-address candidates
//!    and re-normalizes them. This covers records that were never backfilled.
//!
//! Every tier excludes the subject, keeps only members whose status is in the
//! configured active set, orders by association date and caps the result.
//!
//! Tier 1 and 2 index calls that exceed their budget count as misses. Index
//! storage errors and Tier 3 failures propagate as [`MatchError`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use index::{IndexConfig, MatchIndex};
//! use matcher::{InMemoryMemberStore, MatchConfig, TieredMatcher};
//!
//! # async fn run(member: matcher::MemberRecord) -> Result<(), matcher::MatchError> {
//! let index = Arc::new(MatchIndex::new(&IndexConfig::default())?);
//! let store = Arc::new(InMemoryMemberStore::new());
//! let matcher = TieredMatcher::new(index, store, MatchConfig::default())?;
//!
//! if let Some(result) = matcher.find_matches(&member).await? {
//!     println!("{} peers via {}", result.members.len(), result.tier);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Observability
//!
//! Install a [`MatchMetrics`] implementation via [`set_match_metrics`] to
//! record the answering tier, latency and hit count of every lookup.

pub mod classify;
pub mod engine;
pub mod metrics;
pub mod store;
pub mod types;

pub use crate::classify::{AgeGroup, Classifier, HouseholdClassifier, Relationship};
pub use crate::engine::{Subject, TieredMatcher};
pub use crate::metrics::{set_match_metrics, MatchMetrics};
pub use crate::store::{InMemoryMemberStore, MemberStore, StoreError};
pub use crate::types::{
    AddressRecord, MatchConfig, MatchError, MatchResult, MemberRecord, MemberStatus,
};
