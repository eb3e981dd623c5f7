//! End-to-end tests of the sync pipeline over mock ports.

use odontosync_engine::{
    ErrorKind, MemorySource, MockAuth, MockRemote, RemotePort, SourcePort, SyncConfig,
    SyncOrchestrator, SyncResult, TokenCache, TokenConfig,
};
use odontosync_ledger::{FileLedgerStore, InMemoryLedgerStore, LedgerStore};
use odontosync_protocol::{
    ControlStatus, ControlType, Credentials, EntityKind, Record, SourceRecord,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn candidate(key: &str) -> SourceRecord {
    SourceRecord::new(key, Record::new().with("code", key).with("name", "Ana"))
}

fn keys(prefix: &str, n: usize) -> Vec<SourceRecord> {
    (1..=n).map(|i| candidate(&format!("{prefix}{i:03}"))).collect()
}

fn shared_tokens() -> Arc<TokenCache<MockAuth>> {
    Arc::new(TokenCache::new(MockAuth::default(), TokenConfig::default()))
}

fn orchestrator<S: SourcePort, L: LedgerStore>(
    entity: EntityKind,
    config: SyncConfig,
    source: S,
    tokens: Arc<TokenCache<MockAuth>>,
    store: L,
) -> SyncOrchestrator<S, MockRemote, MockAuth, L> {
    SyncOrchestrator::new(entity, config, source, MockRemote::new(), tokens, store).unwrap()
}

#[test]
fn hundred_twenty_beneficiaries_with_one_rejection() {
    let source = MemorySource::with_records(ControlType::Addition, keys("B", 120));
    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default().with_page_size(50),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );
    orch.remote().fail_when_contains("B075", 422);

    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(report.candidates, 120);
    assert_eq!(report.result.attempted, 120);
    assert_eq!(report.result.succeeded, 119);
    assert_eq!(report.result.failed, 1);
    assert_eq!(report.result.pages, 3);

    let offsets: Vec<u64> = orch.source().fetches().iter().map(|f| f.1).collect();
    assert_eq!(offsets, vec![0, 50, 100, 120]);

    let errors = orch.ledger().records(Some(ControlStatus::Error)).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].entity_key, "B075");
    assert_eq!(
        orch.ledger()
            .records(Some(ControlStatus::Success))
            .unwrap()
            .len(),
        119
    );
}

#[test]
fn company_phases_run_exclusion_first() {
    let source = MemorySource::new();
    source.push(ControlType::Addition, candidate("EMP003"));
    source.push(ControlType::Alteration, candidate("EMP002"));
    source.push(ControlType::Exclusion, candidate("EMP001"));
    let orch = orchestrator(
        EntityKind::Company,
        SyncConfig::default(),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    let report = orch.run_full().unwrap();
    let order: Vec<ControlType> = report.phases.iter().map(|p| p.kind).collect();
    assert_eq!(
        order,
        vec![
            ControlType::Exclusion,
            ControlType::Alteration,
            ControlType::Addition
        ]
    );
    let sent: Vec<ControlType> = orch.remote().submissions().iter().map(|s| s.kind).collect();
    assert_eq!(sent, order);
    assert!(report.is_clean());
}

#[test]
fn failing_phase_does_not_stop_the_next() {
    let source = MemorySource::new();
    source.push(ControlType::Addition, candidate("B001"));
    source.push(ControlType::Alteration, candidate("B002"));
    source.push(ControlType::Exclusion, candidate("B003"));
    source.fail_fetch_at(ControlType::Alteration, 0);
    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default(),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    let report = orch.run_full().unwrap();
    let failed: Vec<_> = report.failed_phases().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, ControlType::Alteration);
    assert_eq!(failed[0].1.kind(), ErrorKind::PageFetch);

    assert_eq!(report.totals().succeeded, 2);
    assert_eq!(orch.remote().calls(), 2);
    assert!(!report.is_clean());
}

#[test]
fn emp001_alteration_retries_until_sticky_success() {
    let source = MemorySource::with_records(ControlType::Alteration, vec![candidate("EMP001")]);
    let orch = orchestrator(
        EntityKind::Company,
        SyncConfig::default(),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    orch.remote().fail_when_contains("EMP001", 500);
    orch.run_phase(ControlType::Alteration).unwrap();
    let row = orch
        .ledger()
        .find("EMP001", ControlType::Alteration)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ControlStatus::Error);
    assert_eq!(row.attempts, 1);

    orch.remote().clear_failures();
    orch.run_phase(ControlType::Alteration).unwrap();
    let row = orch
        .ledger()
        .find("EMP001", ControlType::Alteration)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ControlStatus::Success);
    assert_eq!(row.attempts, 2);
    assert!(row.error_message.is_none());

    let report = orch.run_phase(ControlType::Alteration).unwrap();
    assert_eq!(report.result.already_synced, 1);
    assert_eq!(orch.remote().calls(), 2);
    let row = orch
        .ledger()
        .find("EMP001", ControlType::Alteration)
        .unwrap()
        .unwrap();
    assert_eq!(row.attempts, 2);
}

#[test]
fn zero_candidates_make_no_calls_and_no_writes() {
    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default(),
        MemorySource::new(),
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    let report = orch.run_full().unwrap();
    assert_eq!(report.totals().attempted, 0);
    assert_eq!(orch.remote().calls(), 0);
    assert_eq!(orch.ledger().store().writes(), 0);
    assert_eq!(orch.tokens().stats().primary_refreshes, 0);
}

#[test]
fn entity_kinds_share_tokens() {
    let tokens = shared_tokens();
    let companies = orchestrator(
        EntityKind::Company,
        SyncConfig::default(),
        MemorySource::with_records(ControlType::Addition, keys("EMP", 3)),
        Arc::clone(&tokens),
        InMemoryLedgerStore::new(),
    );
    let beneficiaries = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default(),
        MemorySource::with_records(ControlType::Addition, keys("B", 3)),
        Arc::clone(&tokens),
        InMemoryLedgerStore::new(),
    );

    companies.run_full().unwrap();
    beneficiaries.run_full().unwrap();

    assert_eq!(tokens.auth().primary_calls(), 1);
    assert_eq!(tokens.auth().exchange_calls(), 1);
}

#[test]
fn workers_submit_each_candidate_once() {
    let source = MemorySource::with_records(ControlType::Addition, keys("B", 75));
    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default().with_page_size(20).with_workers(4),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(report.result.succeeded, 75);

    let payloads: BTreeSet<String> = orch
        .remote()
        .submissions()
        .into_iter()
        .map(|s| s.payload)
        .collect();
    assert_eq!(payloads.len(), 75);
    assert_eq!(orch.remote().calls(), 75);
    assert_eq!(orch.tokens().stats().primary_refreshes, 1);
}

/// A source that inserts a record ahead of the cursor when a given offset is
/// fetched, like a row committed into the ERP view mid-phase.
struct InsertingSource {
    inner: MemorySource,
    trigger: u64,
    pending: Mutex<Option<(ControlType, SourceRecord)>>,
}

impl SourcePort for InsertingSource {
    fn count_candidates(&self, kind: ControlType) -> SyncResult<u64> {
        self.inner.count_candidates(kind)
    }

    fn fetch_page(
        &self,
        kind: ControlType,
        offset: u64,
        limit: u32,
    ) -> SyncResult<Vec<SourceRecord>> {
        if offset == self.trigger {
            if let Some((k, record)) = self.pending.lock().take() {
                self.inner.push(k, record);
            }
        }
        self.inner.fetch_page(kind, offset, limit)
    }
}

#[test]
fn concurrent_insert_never_double_submits() {
    let source = InsertingSource {
        inner: MemorySource::with_records(ControlType::Addition, keys("B", 60)),
        trigger: 50,
        pending: Mutex::new(Some((ControlType::Addition, candidate("A001")))),
    };
    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default().with_page_size(50),
        source,
        shared_tokens(),
        InMemoryLedgerStore::new(),
    );

    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(report.result.attempted, 61);
    assert_eq!(report.result.already_synced, 1);
    assert_eq!(orch.remote().calls(), 60);

    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(report.result.already_synced, 60);
    assert_eq!(orch.remote().calls(), 61);
}

#[test]
fn file_ledger_survives_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("beneficiary");

    {
        let orch = orchestrator(
            EntityKind::Beneficiary,
            SyncConfig::default(),
            MemorySource::with_records(ControlType::Addition, keys("B", 10)),
            shared_tokens(),
            FileLedgerStore::open(&path).unwrap(),
        );
        orch.remote().fail_when_contains("B004", 503);
        let report = orch.run_phase(ControlType::Addition).unwrap();
        assert_eq!(report.result.failed, 1);
    }

    let orch = orchestrator(
        EntityKind::Beneficiary,
        SyncConfig::default(),
        MemorySource::with_records(ControlType::Addition, keys("B", 10)),
        shared_tokens(),
        FileLedgerStore::open(&path).unwrap(),
    );
    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(report.result.already_synced, 9);
    assert_eq!(orch.remote().calls(), 1);

    let row = orch
        .ledger()
        .find("B004", ControlType::Addition)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ControlStatus::Success);
    assert_eq!(row.attempts, 2);
}

/// A remote that takes a while to answer, so workers overlap.
#[derive(Default)]
struct SlowRemote {
    submits: AtomicUsize,
}

impl RemotePort for SlowRemote {
    fn submit(
        &self,
        _kind: ControlType,
        _payload: &str,
        _credentials: &Credentials,
    ) -> SyncResult<String> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
        Ok("{}".to_string())
    }
}

#[test]
fn duplicate_key_in_one_page_is_submitted_once_by_workers() {
    let source = MemorySource::with_records(
        ControlType::Addition,
        vec![candidate("B001"), candidate("B001")],
    );
    let orch = SyncOrchestrator::new(
        EntityKind::Beneficiary,
        SyncConfig::default().with_workers(2),
        source,
        SlowRemote::default(),
        shared_tokens(),
        InMemoryLedgerStore::new(),
    )
    .unwrap();

    let report = orch.run_phase(ControlType::Addition).unwrap();
    assert_eq!(orch.remote().submits.load(Ordering::SeqCst), 1);
    assert_eq!(report.result.attempted, 2);
    assert_eq!(report.result.succeeded, 2);
    assert_eq!(report.result.already_synced, 1);

    let row = orch
        .ledger()
        .find("B001", ControlType::Addition)
        .unwrap()
        .unwrap();
    assert_eq!(row.status, ControlStatus::Success);
    assert_eq!(row.attempts, 1);
}
