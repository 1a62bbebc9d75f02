mod common;

use std::sync::Arc;

use addrmatch::{
    AddrMatchConfig, AddressMatchService, CacheBackend, CacheEntry, CacheError, CacheKey,
    CacheManager, InMemoryMemberStore, MatchIndex, MemberId, MemberStatus, Tier,
};
use common::{date, init_tracing, member, Harness};

#[tokio::test]
async fn dorpsstraat_move_is_visible_immediately() {
    let h = Harness::new();
    h.save(member("a", "Dorpsstraat 1", "Ede", date(2016, 1, 1)));
    h.save(member("b", "Dorpsstraat 1", "Ede", date(2017, 1, 1)));
    h.save(member("c", "Dorpsstraat 3", "Ede", date(2018, 1, 1)));

    // Warm both households, including a cached empty result for c.
    assert_eq!(h.related_ids("a").await, vec!["b"]);
    assert!(h.related_ids("c").await.is_empty());
    assert!(h.service.cache().len() >= 2);

    h.move_member("b", "Dorpsstr. 3", "Ede");

    assert!(h.related_ids("a").await.is_empty());
    assert_eq!(h.related_ids("c").await, vec!["b"]);
    assert_eq!(h.related_ids("b").await, vec!["c"]);
}

#[tokio::test]
async fn move_into_kerkstraat_household() {
    let h = Harness::new();
    h.save(member("a", "Kerkstraat 12", "Utrecht", date(2015, 1, 1)));
    h.save(member("b", "kerkstr. 12", "utrecht", date(2016, 1, 1)));
    h.save(member("c", "Dorpsstraat 1", "Ede", date(2017, 1, 1)));
    h.save(member("d", "Dorpsstraat 1", "Ede", date(2018, 1, 1)));

    assert_eq!(h.related_ids("a").await, vec!["b"]);
    assert_eq!(h.related_ids("b").await, vec!["a"]);
    assert_eq!(h.related_ids("d").await, vec!["c"]);

    h.move_member("c", "Kerkstraat 12", "Utrecht");

    assert_eq!(h.related_ids("a").await, vec!["b", "c"]);
    assert_eq!(h.related_ids("b").await, vec!["a", "c"]);
    assert_eq!(h.related_ids("c").await, vec!["a", "b"]);
    assert!(h.related_ids("d").await.is_empty());
}

#[tokio::test]
async fn repeated_lookup_is_served_from_cache() {
    let h = Harness::new();
    h.save(member("a", "Kerkstraat 12", "Utrecht", date(2020, 1, 1)));
    h.save(member("b", "Kerkstraat 12", "Utrecht", date(2020, 2, 1)));

    assert_eq!(h.related_ids("a").await, vec!["b"]);
    let before = h.service.cache().stats();
    assert_eq!(h.related_ids("a").await, vec!["b"]);
    let after = h.service.cache().stats();

    assert_eq!(after.hits, before.hits + 1);
    assert_eq!(after.sets, before.sets);
}

#[tokio::test]
async fn cached_peers_are_refiltered_by_status() {
    let h = Harness::new();
    h.save(member("a", "Kerkstraat 12", "Utrecht", date(2020, 1, 1)));
    h.save(member("b", "Kerkstraat 12", "Utrecht", date(2020, 2, 1)));
    assert_eq!(h.related_ids("a").await, vec!["b"]);

    // Same address, so the save hook leaves the cache alone.
    h.set_status("b", MemberStatus::Terminated);
    let hits = h.service.cache().stats().hits;

    assert!(h.related_ids("a").await.is_empty());
    assert_eq!(h.service.cache().stats().hits, hits + 1);
}

#[tokio::test]
async fn unrelated_entries_survive_a_move() {
    let h = Harness::new();
    h.save(member("a", "Dorpsstraat 1", "Ede", date(2016, 1, 1)));
    h.save(member("b", "Dorpsstraat 1", "Ede", date(2017, 1, 1)));
    h.save(member("x", "Markt 3", "Gouda", date(2016, 1, 1)));
    h.save(member("y", "Markt 3", "Gouda", date(2017, 1, 1)));
    h.related_ids("a").await;
    h.related_ids("x").await;

    h.move_member("b", "Molenweg 8", "Zwolle");

    let gouda = h
        .service
        .cache()
        .lookup(&CacheKey::new("x", addrmatch::fingerprint("markt 3", "gouda")));
    assert_eq!(gouda.map(|v| v.tier), Some(Tier::Fingerprint));
}

/// Backend that fails every call.
struct BrokenBackend;

impl CacheBackend for BrokenBackend {
    fn get(&self, _: Tier, _: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    fn set(&self, _: Tier, _: CacheKey, _: CacheEntry) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    fn remove(&self, _: Tier, _: &CacheKey) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    fn remove_where(
        &self,
        _: &mut dyn FnMut(Tier, &CacheKey, &CacheEntry) -> bool,
    ) -> Result<usize, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    fn len(&self) -> usize {
        0
    }
}

#[tokio::test]
async fn broken_cache_degrades_to_direct_lookups() {
    init_tracing();
    let cfg = AddrMatchConfig::default();
    let store = Arc::new(InMemoryMemberStore::new());
    let index = Arc::new(MatchIndex::new(&cfg.index).unwrap());
    let cache = Arc::new(CacheManager::with_backend(cfg.cache, Arc::new(BrokenBackend)));
    let service =
        AddressMatchService::with_components(&cfg, index, cache, store.clone()).unwrap();

    for (id, since) in [("a", date(2020, 1, 1)), ("b", date(2020, 2, 1))] {
        let mut record = member(id, "Kerkstraat 12", "Utrecht", since);
        let update = service
            .hook()
            .on_before_persist(&record.member_id, record.address.as_ref(), None)
            .unwrap();
        common::apply(&mut record, update);
        store.insert(record);
    }

    for _ in 0..2 {
        let related = service.find_related_members(&"a".into()).await.unwrap();
        assert_eq!(related.member_ids(), vec![MemberId::from("b")]);
    }
    let stats = service.cache().stats();
    assert_eq!(stats.hits, 0);
    assert!(stats.errors > 0);
}
