mod common;

use std::io::Write;
use std::sync::Arc;

use addrmatch::{
    AddrMatchConfig, AddrMatchError, AddressMatchService, BackendConfig, ConfigLoadError,
    InMemoryMemberStore, MemberStatus,
};
use common::{date, member, Harness};
use tempfile::NamedTempFile;

#[test]
fn yaml_file_configures_every_section() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"version: "1"
name: "ledenadministratie"
normalize:
  max_input_bytes: 256
index:
  backend:
    kind: in_memory
  collision_sample_size: 8
cache:
  enabled: false
matcher:
  max_results: 2
  active_statuses: [Active]
maintenance:
  tombstone_retention_days: 7
"#
    )
    .unwrap();

    let cfg = AddrMatchConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.normalize.max_input_bytes, 256);
    assert_eq!(cfg.index.backend, BackendConfig::InMemory);
    assert_eq!(cfg.index.collision_sample_size, 8);
    assert!(!cfg.cache.enabled);
    assert_eq!(cfg.matcher.active_statuses, vec![MemberStatus::Active]);
    assert_eq!(cfg.maintenance.tombstone_retention_days, 7);
    assert_eq!(cfg.maintenance.backfill_batch_size, 200);
}

#[test]
fn invalid_section_is_rejected_by_the_service() {
    let mut cfg = AddrMatchConfig::default();
    cfg.matcher.max_results = 0;
    let store = Arc::new(InMemoryMemberStore::new());

    let err = AddressMatchService::new(&cfg, store).err().unwrap();
    assert!(matches!(
        err,
        AddrMatchError::Config(ConfigLoadError::Validation(msg)) if msg.starts_with("matcher:")
    ));
}

#[tokio::test]
async fn disabled_cache_still_answers() {
    let mut cfg = AddrMatchConfig::default();
    cfg.cache.enabled = false;
    cfg.matcher.max_results = 1;
    let h = Harness::with_config(&cfg);
    h.save(member("a", "Kerkstraat 12", "Utrecht", date(2020, 1, 1)));
    h.save(member("b", "Kerkstraat 12", "Utrecht", date(2020, 2, 1)));
    h.save(member("c", "Kerkstraat 12", "Utrecht", date(2020, 3, 1)));

    assert_eq!(h.related_ids("a").await, vec!["b"]);
    assert_eq!(h.related_ids("a").await, vec!["b"]);
    assert!(h.service.cache().is_empty());
}

#[cfg(feature = "backend-redb")]
#[tokio::test]
async fn redb_index_survives_restart() {
    use addrmatch::Tier;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("index.redb");
    let yaml = format!(
        "version: \"1.0\"\nindex:\n  backend:\n    kind: redb\n    path: '{}'\n",
        path.display()
    );
    let cfg = AddrMatchConfig::from_yaml(&yaml).unwrap();

    let saved = {
        let h = Harness::with_config(&cfg);
        let a = h.save(member("a", "Van der Helststraat 3", "Den Haag", date(2020, 1, 1)));
        let b = h.save(member("b", "van der helststr 3", "den haag", date(2020, 2, 1)));
        h.delete("b");
        let c = h.save(member("c", "Van der Helststraat 3", "Den Haag", date(2020, 3, 1)));
        vec![a, b, c]
    };

    // Fresh process: the store still has every record, the index is reloaded
    // from disk.
    let h = Harness::with_config(&cfg);
    for record in saved {
        if record.member_id.as_str() != "b" {
            h.store.insert(record);
        }
    }
    let a = h.store.update(&"a".into(), |_| {}).unwrap();

    let result = h.service.matcher().find_matches(&a).await.unwrap().unwrap();
    assert_eq!(result.tier, Tier::Fingerprint);
    assert_eq!(h.related_ids("a").await, vec!["c"]);
    assert_eq!(h.service.index().live_count().unwrap(), 2);
    assert!(h.service.index().get(&"b".into()).unwrap().unwrap().deleted_at.is_some());
}
