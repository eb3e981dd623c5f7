//! Collaborator ports the engine calls out to.
//!
//! The engine never talks to the network or the ERP directly. It goes through
//! these traits, so the same code runs against HTTP adapters in production and
//! against the mocks below in tests.

use crate::error::{SyncError, SyncResult};
use odontosync_protocol::{ControlType, Credentials, SourceRecord};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// A token as issued by the insurer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// Opaque token value.
    pub value: String,
    /// Nominal lifetime from the moment of issue.
    pub ttl: Duration,
}

impl IssuedToken {
    /// Creates an issued token.
    pub fn new(value: impl Into<String>, ttl: Duration) -> Self {
        Self {
            value: value.into(),
            ttl,
        }
    }
}

/// Issues the two chained tokens.
pub trait AuthPort: Send + Sync {
    /// Fetches a new primary (gateway) token.
    fn fetch_primary_token(&self) -> SyncResult<IssuedToken>;

    /// Exchanges a valid primary token for a secondary (domain) token.
    fn exchange_secondary_token(&self, primary: &str) -> SyncResult<IssuedToken>;
}

/// The insurer's write endpoints.
pub trait RemotePort: Send + Sync {
    /// Submits one payload for one control type and returns the response body.
    fn submit(
        &self,
        kind: ControlType,
        payload: &str,
        credentials: &Credentials,
    ) -> SyncResult<String>;
}

/// The ERP views that yield sync candidates.
///
/// Pages are ordered by a stable key so that offset paging neither skips nor
/// repeats rows that existed when the phase started.
pub trait SourcePort: Send + Sync {
    /// Counts the candidates of a phase.
    fn count_candidates(&self, kind: ControlType) -> SyncResult<u64>;

    /// Fetches up to `limit` candidates starting at `offset`.
    fn fetch_page(&self, kind: ControlType, offset: u64, limit: u32)
        -> SyncResult<Vec<SourceRecord>>;
}

/// A mock auth port for testing.
///
/// Issues `primary-N` and `secondary-N` tokens, counting calls.
#[derive(Debug)]
pub struct MockAuth {
    ttl: Duration,
    primary_calls: AtomicU64,
    exchange_calls: AtomicU64,
    fail_primary: AtomicBool,
    fail_exchange: AtomicBool,
    last_exchanged: Mutex<Option<String>>,
}

impl MockAuth {
    /// Creates a mock issuing tokens with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            primary_calls: AtomicU64::new(0),
            exchange_calls: AtomicU64::new(0),
            fail_primary: AtomicBool::new(false),
            fail_exchange: AtomicBool::new(false),
            last_exchanged: Mutex::new(None),
        }
    }

    /// Makes primary fetches fail.
    pub fn fail_primary(&self, fail: bool) {
        self.fail_primary.store(fail, Ordering::SeqCst);
    }

    /// Makes secondary exchanges fail.
    pub fn fail_exchange(&self, fail: bool) {
        self.fail_exchange.store(fail, Ordering::SeqCst);
    }

    /// Successful primary fetches so far.
    pub fn primary_calls(&self) -> u64 {
        self.primary_calls.load(Ordering::SeqCst)
    }

    /// Successful exchanges so far.
    pub fn exchange_calls(&self) -> u64 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// The primary token presented to the most recent exchange.
    pub fn last_exchanged_primary(&self) -> Option<String> {
        self.last_exchanged.lock().clone()
    }
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

impl AuthPort for MockAuth {
    fn fetch_primary_token(&self) -> SyncResult<IssuedToken> {
        if self.fail_primary.load(Ordering::SeqCst) {
            return Err(SyncError::authentication("primary token endpoint refused"));
        }
        let n = self.primary_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken::new(format!("primary-{n}"), self.ttl))
    }

    fn exchange_secondary_token(&self, primary: &str) -> SyncResult<IssuedToken> {
        if self.fail_exchange.load(Ordering::SeqCst) {
            return Err(SyncError::authentication("token exchange refused"));
        }
        *self.last_exchanged.lock() = Some(primary.to_string());
        let n = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedToken::new(format!("secondary-{n}"), self.ttl))
    }
}

/// One call received by [`MockRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Control type of the call.
    pub kind: ControlType,
    /// Payload as sent.
    pub payload: String,
    /// Credentials presented.
    pub credentials: Credentials,
}

/// A mock remote port for testing.
///
/// Accepts every submission unless its payload contains a registered needle,
/// in which case it answers with that needle's HTTP status.
#[derive(Debug, Default)]
pub struct MockRemote {
    submissions: Mutex<Vec<Submission>>,
    failures: RwLock<BTreeMap<String, u16>>,
}

impl MockRemote {
    /// Creates a mock that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects payloads containing `needle` with `status`.
    pub fn fail_when_contains(&self, needle: impl Into<String>, status: u16) {
        self.failures.write().insert(needle.into(), status);
    }

    /// Clears all registered failures.
    pub fn clear_failures(&self) {
        self.failures.write().clear();
    }

    /// Returns every submission received, in arrival order.
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Returns the number of submissions received.
    pub fn calls(&self) -> usize {
        self.submissions.lock().len()
    }
}

impl RemotePort for MockRemote {
    fn submit(
        &self,
        kind: ControlType,
        payload: &str,
        credentials: &Credentials,
    ) -> SyncResult<String> {
        self.submissions.lock().push(Submission {
            kind,
            payload: payload.to_string(),
            credentials: credentials.clone(),
        });

        let failure = self
            .failures
            .read()
            .iter()
            .find(|(needle, _)| payload.contains(needle.as_str()))
            .map(|(_, status)| *status);
        match failure {
            Some(status) => Err(SyncError::remote_status(
                status,
                format!("insurer answered HTTP {status}"),
            )),
            None => Ok(format!("{{\"accepted\":\"{}\"}}", kind.as_str())),
        }
    }
}

/// An in-memory candidate source.
///
/// Candidates are kept sorted by key per control type; records pushed while a
/// phase runs land in key order like rows inserted into a live view.
#[derive(Debug, Default)]
pub struct MemorySource {
    candidates: RwLock<BTreeMap<ControlType, Vec<SourceRecord>>>,
    failing_offsets: RwLock<BTreeMap<ControlType, u64>>,
    failing_counts: RwLock<Vec<ControlType>>,
    fetches: Mutex<Vec<(ControlType, u64, u32)>>,
}

impl MemorySource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `records` for one control type.
    pub fn with_records(kind: ControlType, records: Vec<SourceRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.push(kind, record);
        }
        source
    }

    /// Adds a candidate in key order.
    pub fn push(&self, kind: ControlType, record: SourceRecord) {
        let mut candidates = self.candidates.write();
        let list = candidates.entry(kind).or_default();
        let at = list.partition_point(|r| r.key <= record.key);
        list.insert(at, record);
    }

    /// Makes the fetch at `offset` for `kind` fail.
    pub fn fail_fetch_at(&self, kind: ControlType, offset: u64) {
        self.failing_offsets.write().insert(kind, offset);
    }

    /// Makes counting `kind` fail.
    pub fn fail_count(&self, kind: ControlType) {
        self.failing_counts.write().push(kind);
    }

    /// Returns every `(kind, offset, limit)` fetched so far.
    pub fn fetches(&self) -> Vec<(ControlType, u64, u32)> {
        self.fetches.lock().clone()
    }
}

impl SourcePort for MemorySource {
    fn count_candidates(&self, kind: ControlType) -> SyncResult<u64> {
        if self.failing_counts.read().contains(&kind) {
            return Err(SyncError::page_fetch(format!("cannot count {kind} candidates")));
        }
        Ok(self
            .candidates
            .read()
            .get(&kind)
            .map_or(0, |list| list.len() as u64))
    }

    fn fetch_page(
        &self,
        kind: ControlType,
        offset: u64,
        limit: u32,
    ) -> SyncResult<Vec<SourceRecord>> {
        self.fetches.lock().push((kind, offset, limit));
        if self.failing_offsets.read().get(&kind) == Some(&offset) {
            return Err(SyncError::page_fetch(format!(
                "view for {kind} unavailable at offset {offset}"
            )));
        }

        let candidates = self.candidates.read();
        let Some(list) = candidates.get(&kind) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(list.len());
        let end = start.saturating_add(limit as usize).min(list.len());
        Ok(list[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odontosync_protocol::Record;

    fn record(key: &str) -> SourceRecord {
        SourceRecord::new(key, Record::new().with("code", key))
    }

    #[test]
    fn mock_auth_numbers_tokens() {
        let auth = MockAuth::default();
        assert_eq!(auth.fetch_primary_token().unwrap().value, "primary-1");
        assert_eq!(
            auth.exchange_secondary_token("primary-1").unwrap().value,
            "secondary-1"
        );
        assert_eq!(auth.last_exchanged_primary().as_deref(), Some("primary-1"));

        auth.fail_exchange(true);
        let err = auth.exchange_secondary_token("primary-1").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Authentication);
        assert_eq!(auth.exchange_calls(), 1);
    }

    #[test]
    fn mock_remote_fails_on_needle() {
        let remote = MockRemote::new();
        remote.fail_when_contains("B075", 422);
        let creds = Credentials::new("p", "s");

        assert!(remote
            .submit(ControlType::Addition, "{\"code\":\"B001\"}", &creds)
            .is_ok());
        let err = remote
            .submit(ControlType::Addition, "{\"code\":\"B075\"}", &creds)
            .unwrap_err();
        assert_eq!(err.http_status(), Some(422));
        assert_eq!(remote.calls(), 2);
    }

    #[test]
    fn memory_source_pages_in_key_order() {
        let source = MemorySource::new();
        for key in ["C", "A", "B"] {
            source.push(ControlType::Exclusion, record(key));
        }

        assert_eq!(source.count_candidates(ControlType::Exclusion).unwrap(), 3);
        let page = source.fetch_page(ControlType::Exclusion, 1, 5).unwrap();
        let keys: Vec<_> = page.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["B", "C"]);
        assert!(source
            .fetch_page(ControlType::Exclusion, 3, 5)
            .unwrap()
            .is_empty());
        assert!(source
            .fetch_page(ControlType::Addition, 0, 5)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn memory_source_failures() {
        let source = MemorySource::with_records(ControlType::Addition, vec![record("A")]);
        source.fail_fetch_at(ControlType::Addition, 0);
        source.fail_count(ControlType::Alteration);

        assert!(source.fetch_page(ControlType::Addition, 0, 10).is_err());
        assert!(source.count_candidates(ControlType::Alteration).is_err());
        assert_eq!(source.fetches(), vec![(ControlType::Addition, 0, 10)]);
    }
}
