//! In-memory ledger store for testing.

use crate::error::{LedgerError, LedgerResult};
use crate::record::ControlRecord;
use crate::store::LedgerStore;
use odontosync_protocol::ControlType;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

type Key = (String, ControlType);

/// An in-memory ledger store.
///
/// Suitable for unit tests, integration tests and dry runs. Enforces the same
/// uniqueness constraint as the file store and counts writes so tests can
/// assert that a run left the ledger untouched.
///
/// # Example
///
/// ```rust
/// use odontosync_ledger::{ControlRecord, InMemoryLedgerStore, LedgerStore};
/// use odontosync_protocol::ControlType;
///
/// let store = InMemoryLedgerStore::new();
/// let record = ControlRecord::new("EMP001", ControlType::Addition, "{}", chrono::Utc::now());
/// store.insert(&record).unwrap();
/// assert!(store.insert(&record).is_err());
/// assert_eq!(store.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    rows: RwLock<BTreeMap<Key, ControlRecord>>,
    writes: AtomicU64,
}

impl InMemoryLedgerStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with rows.
    ///
    /// Later rows with the same key replace earlier ones. Seeding does not
    /// count as writes.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = ControlRecord>) -> Self {
        let rows = records
            .into_iter()
            .map(|r| ((r.entity_key.clone(), r.control_type), r))
            .collect();
        Self {
            rows: RwLock::new(rows),
            writes: AtomicU64::new(0),
        }
    }

    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the store has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns the number of successful `insert` and `save` calls.
    #[must_use]
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn find(
        &self,
        entity_key: &str,
        control_type: ControlType,
    ) -> LedgerResult<Option<ControlRecord>> {
        Ok(self
            .rows
            .read()
            .get(&(entity_key.to_string(), control_type))
            .cloned())
    }

    fn insert(&self, record: &ControlRecord) -> LedgerResult<()> {
        let mut rows = self.rows.write();
        let key = (record.entity_key.clone(), record.control_type);
        if rows.contains_key(&key) {
            return Err(LedgerError::DuplicateKey {
                entity_key: record.entity_key.clone(),
                control_type: record.control_type,
            });
        }
        rows.insert(key, record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn save(&self, record: &ControlRecord) -> LedgerResult<()> {
        let mut rows = self.rows.write();
        let key = (record.entity_key.clone(), record.control_type);
        match rows.get_mut(&key) {
            Some(row) => {
                *row = record.clone();
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(LedgerError::NotFound {
                entity_key: record.entity_key.clone(),
                control_type: record.control_type,
            }),
        }
    }

    fn records(&self) -> LedgerResult<Vec<ControlRecord>> {
        Ok(self.rows.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use odontosync_protocol::ControlStatus;

    fn row(key: &str, control_type: ControlType) -> ControlRecord {
        ControlRecord::new(key, control_type, "{}", Utc::now())
    }

    #[test]
    fn memory_new_is_empty() {
        let store = InMemoryLedgerStore::new();
        assert!(store.is_empty());
        assert_eq!(store.writes(), 0);
        assert!(store.records().unwrap().is_empty());
    }

    #[test]
    fn memory_insert_enforces_uniqueness() {
        let store = InMemoryLedgerStore::new();
        store.insert(&row("EMP001", ControlType::Addition)).unwrap();

        let err = store.insert(&row("EMP001", ControlType::Addition)).unwrap_err();
        assert!(err.is_duplicate());

        // Same key, different control type is a different row
        store.insert(&row("EMP001", ControlType::Exclusion)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.writes(), 2);
    }

    #[test]
    fn memory_save_requires_existing_row() {
        let store = InMemoryLedgerStore::new();
        let mut record = row("EMP001", ControlType::Alteration);

        let result = store.save(&record);
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));

        store.insert(&record).unwrap();
        record.fail("boom", Utc::now());
        store.save(&record).unwrap();

        let stored = store.find("EMP001", ControlType::Alteration).unwrap().unwrap();
        assert_eq!(stored.status, ControlStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn memory_records_are_sorted() {
        let store = InMemoryLedgerStore::with_records([
            row("B", ControlType::Addition),
            row("A", ControlType::Exclusion),
            row("A", ControlType::Addition),
        ]);
        let keys: Vec<_> = store
            .records()
            .unwrap()
            .iter()
            .map(|r| (r.entity_key.clone(), r.control_type))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A".to_string(), ControlType::Addition),
                ("A".to_string(), ControlType::Exclusion),
                ("B".to_string(), ControlType::Addition),
            ]
        );
        assert_eq!(store.writes(), 0);
    }
}
