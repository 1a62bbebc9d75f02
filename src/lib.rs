//! Address-based household matching for membership administrations.
//!
//! This crate wires the workspace layers into one entry point:
//!
//! - [`canonical`]: normalizes address lines and city names and derives the
//!   base fingerprint.
//! - [`index`]: the persisted match index, with collision handling for
//!   fingerprints.
//! - [`matcher`]: the three-tier lookup (fingerprint, normalized fields,
//!   join fallback) over a host [`MemberStore`].
//! - [`cache`]: tier-aware result cache with explicit invalidation.
//!
//! Hosts call the [`RecomputeHook`] around their own saves and deletes, and
//! query through [`AddressMatchService`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use addrmatch::{AddrMatchConfig, AddressMatchService, InMemoryMemberStore, RelatedMembers};
//!
//! # async fn run() -> Result<(), addrmatch::AddrMatchError> {
//! let cfg = AddrMatchConfig::from_file("addrmatch.yaml")?;
//! let store = Arc::new(InMemoryMemberStore::new());
//! let service = AddressMatchService::new(&cfg, store)?;
//!
//! match service.find_related_members(&"member-42".into()).await? {
//!     RelatedMembers::Found(peers) => {
//!         for peer in peers {
//!             println!("{} ({})", peer.member_id, peer.relationship_label());
//!         }
//!     }
//!     RelatedMembers::Unavailable => println!("household lookup unavailable"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod hooks;
pub mod service;

pub use cache::{
    CacheBackend, CacheConfig, CacheEntry, CacheError, CacheKey, CacheManager, CacheStats,
    CacheValue,
};
pub use canonical::{
    fingerprint, normalize_address_pair, normalize_city, normalize_line,
    try_normalize_address_pair, Fingerprint, NormalizationError, NormalizeConfig,
    NormalizedAddress,
};
pub use index::{
    BackendConfig, CollisionHandler, ComputedFields, Confidence, IndexConfig, IndexError,
    MatchIndex, MemberId, RawComputedFields, Tier,
};
pub use matcher::{
    set_match_metrics, AddressRecord, AgeGroup, Classifier, HouseholdClassifier,
    InMemoryMemberStore, MatchConfig, MatchError, MatchMetrics, MatchResult, MemberRecord,
    MemberStatus, MemberStore, Relationship, StoreError, Subject, TieredMatcher,
};

pub use crate::config::{AddrMatchConfig, ConfigLoadError, MaintenanceConfig};
pub use crate::hooks::{ComputedFieldsUpdate, HookError, RecomputeHook};
pub use crate::service::{
    AddressMatchService, BackfillBatch, BackfillReport, RelatedMember, RelatedMembers,
};

use thiserror::Error;

/// Errors surfaced by [`AddressMatchService`] and the config loader.
#[derive(Debug, Error)]
pub enum AddrMatchError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hook(#[from] HookError),
    #[error("unknown member {0}")]
    UnknownMember(MemberId),
    #[error("background task failed: {0}")]
    Task(String),
}
