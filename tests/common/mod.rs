#![allow(dead_code)]

use std::sync::{Arc, Once};

use addrmatch::{
    AddrMatchConfig, AddressMatchService, AddressRecord, ComputedFieldsUpdate,
    InMemoryMemberStore, MemberId, MemberRecord, MemberStatus, RelatedMembers,
};
use chrono::{Duration, NaiveDate, Utc};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Route library logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}

/// Birth date roughly `years` whole years before today.
pub fn born_years_ago(years: i64) -> NaiveDate {
    Utc::now().date_naive() - Duration::days(365 * years + 30)
}

pub fn member(id: &str, line: &str, city: &str, since: NaiveDate) -> MemberRecord {
    MemberRecord {
        member_id: id.into(),
        status: MemberStatus::Active,
        member_since: since,
        full_name: None,
        birth_date: None,
        address: Some(AddressRecord::new(line, city)),
        computed: None,
    }
}

pub fn person(
    id: &str,
    name: &str,
    birth_date: NaiveDate,
    line: &str,
    city: &str,
    since: NaiveDate,
) -> MemberRecord {
    MemberRecord {
        full_name: Some(name.to_string()),
        birth_date: Some(birth_date),
        ..member(id, line, city, since)
    }
}

/// A service over an in-memory store, driven the way a host application
/// would drive it.
pub struct Harness {
    pub service: AddressMatchService,
    pub store: Arc<InMemoryMemberStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(&AddrMatchConfig::default())
    }

    pub fn with_config(cfg: &AddrMatchConfig) -> Self {
        init_tracing();
        let store = Arc::new(InMemoryMemberStore::new());
        let service = AddressMatchService::new(cfg, store.clone()).expect("valid config");
        Self { service, store }
    }

    /// Run the save hook and store the record with its resulting fields.
    pub fn save(&self, mut record: MemberRecord) -> MemberRecord {
        let update = self
            .service
            .hook()
            .on_before_persist(
                &record.member_id,
                record.address.as_ref(),
                record.computed.as_ref(),
            )
            .expect("hook succeeds");
        apply(&mut record, update);
        self.store.insert(record.clone());
        record
    }

    /// Insert a record that never went through the hook, like rows written
    /// before the computed fields existed.
    pub fn insert_legacy(&self, record: MemberRecord) {
        self.store.insert(record);
    }

    pub fn move_member(&self, id: &str, line: &str, city: &str) -> MemberRecord {
        let id = MemberId::from(id);
        let record = self
            .store
            .update(&id, |r| r.address = Some(AddressRecord::new(line, city)))
            .expect("member exists");
        self.save(record)
    }

    pub fn set_status(&self, id: &str, status: MemberStatus) -> MemberRecord {
        let record = self
            .store
            .update(&id.into(), |r| r.status = status)
            .expect("member exists");
        self.save(record)
    }

    pub fn delete(&self, id: &str) {
        let id = MemberId::from(id);
        self.store.remove(&id);
        self.service
            .hook()
            .on_after_delete(&id)
            .expect("delete hook succeeds");
    }

    pub async fn related(&self, id: &str) -> RelatedMembers {
        self.service
            .find_related_members(&id.into())
            .await
            .expect("lookup succeeds")
    }

    pub async fn related_ids(&self, id: &str) -> Vec<String> {
        match self.related(id).await {
            RelatedMembers::Found(peers) => peers
                .into_iter()
                .map(|p| p.member_id.as_str().to_string())
                .collect(),
            RelatedMembers::Unavailable => panic!("lookup for {id} unavailable"),
        }
    }
}

pub fn apply(record: &mut MemberRecord, update: ComputedFieldsUpdate) {
    match update {
        ComputedFieldsUpdate::Set(fields) => record.computed = Some(fields),
        ComputedFieldsUpdate::Clear => record.computed = None,
        ComputedFieldsUpdate::Unchanged => {}
    }
}
