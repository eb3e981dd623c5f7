//! Ledger storage trait definition.

use crate::error::{LedgerError, LedgerResult};
use crate::record::ControlRecord;
use chrono::{DateTime, Utc};
use odontosync_protocol::ControlType;
use tracing::debug;

/// How many times [`LedgerStore::upsert`] re-reads after losing an insert race.
const UPSERT_RETRIES: usize = 3;

/// Storage for [`ControlRecord`] rows.
///
/// Stores know nothing about sync semantics beyond the uniqueness constraint.
///
/// # Invariants
///
/// - `insert` fails with [`LedgerError::DuplicateKey`] if a row with the same
///   `(entity_key, control_type)` already exists
/// - `save` replaces an existing row and fails with [`LedgerError::NotFound`]
///   otherwise
/// - `find` returns exactly what the last successful `insert`/`save` wrote
/// - Stores must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryLedgerStore`] - For testing
/// - [`super::FileLedgerStore`] - For persistent storage
pub trait LedgerStore: Send + Sync {
    /// Looks up the row for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn find(&self, entity_key: &str, control_type: ControlType)
        -> LedgerResult<Option<ControlRecord>>;

    /// Inserts a new row, enforcing uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::DuplicateKey`] if the key exists, or an I/O error.
    fn insert(&self, record: &ControlRecord) -> LedgerResult<()>;

    /// Replaces an existing row.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::NotFound`] if the key does not exist, or an I/O error.
    fn save(&self, record: &ControlRecord) -> LedgerResult<()>;

    /// Returns every row, sorted by `(entity_key, control_type)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn records(&self) -> LedgerResult<Vec<ControlRecord>>;

    /// Finds the row for a key and enters it for a new attempt, or creates it.
    ///
    /// - `SUCCESS` rows are returned unchanged
    /// - other existing rows are re-entered (attempts + 1) and saved
    /// - missing rows are inserted with one attempt
    ///
    /// Returns the row and whether it was created by this call. An insert that
    /// hits the uniqueness constraint means another writer created the row
    /// first; the lookup is retried instead of inserting again.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Contended`] if the key keeps flipping between
    /// lookups, or any store error.
    fn upsert(
        &self,
        entity_key: &str,
        control_type: ControlType,
        payload: &str,
        now: DateTime<Utc>,
    ) -> LedgerResult<(ControlRecord, bool)> {
        for _ in 0..UPSERT_RETRIES {
            if let Some(mut existing) = self.find(entity_key, control_type)? {
                if existing.is_success() {
                    return Ok((existing, false));
                }
                existing.reenter(payload, now);
                self.save(&existing)?;
                return Ok((existing, false));
            }

            let record = ControlRecord::new(entity_key, control_type, payload, now);
            match self.insert(&record) {
                Ok(()) => return Ok((record, true)),
                Err(e) if e.is_duplicate() => {
                    debug!(
                        entity_key,
                        control_type = %control_type,
                        "ledger insert lost a race, retrying lookup"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::Contended {
            entity_key: entity_key.to_string(),
            control_type,
        })
    }
}
