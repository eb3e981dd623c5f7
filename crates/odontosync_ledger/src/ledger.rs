//! The idempotent control ledger.

use crate::error::{LedgerError, LedgerResult};
use crate::record::ControlRecord;
use crate::store::LedgerStore;
use chrono::Utc;
use odontosync_protocol::{ControlStatus, ControlType};
use parking_lot::ReentrantMutex;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

/// Number of lock stripes used to serialize work per key.
const KEY_STRIPES: usize = 64;

/// Idempotent log of sync attempts.
///
/// Wraps a [`LedgerStore`] with the find-or-create algorithm and the
/// success / error transitions. Calls for the same `(entity_key,
/// control_type)` are serialized in-process through striped locks; across
/// processes the store's uniqueness constraint is the guard. The stripes are
/// reentrant, so a caller holding [`ControlLedger::with_key_lock`] can still
/// call the ledger for that key.
pub struct ControlLedger<S: LedgerStore> {
    store: S,
    stripes: Vec<ReentrantMutex<()>>,
    max_attempts: Option<u32>,
}

impl<S: LedgerStore> ControlLedger<S> {
    /// Creates a ledger with unbounded retries.
    pub fn new(store: S) -> Self {
        Self {
            store,
            stripes: (0..KEY_STRIPES).map(|_| ReentrantMutex::new(())).collect(),
            max_attempts: None,
        }
    }

    /// Caps how many times a failing row may be re-entered.
    ///
    /// Once a non-successful row has `attempts >= max`, `find_or_create`
    /// refuses it with [`LedgerError::AttemptsExhausted`].
    pub fn with_max_attempts(mut self, max: Option<u32>) -> Self {
        self.max_attempts = max;
        self
    }

    /// Returns the configured attempt cap.
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn stripe(&self, entity_key: &str, control_type: ControlType) -> &ReentrantMutex<()> {
        let mut hasher = DefaultHasher::new();
        entity_key.hash(&mut hasher);
        control_type.hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.stripes.len();
        &self.stripes[idx]
    }

    /// Runs `f` while holding the lock of `(entity_key, control_type)`.
    ///
    /// Holding it across find-or-create, the remote call and the mark makes the
    /// whole attempt exclusive per key. Keys sharing a stripe also wait.
    pub fn with_key_lock<T>(
        &self,
        entity_key: &str,
        control_type: ControlType,
        f: impl FnOnce() -> T,
    ) -> T {
        let _guard = self.stripe(entity_key, control_type).lock();
        f()
    }

    /// Looks up a row without touching it.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn find(
        &self,
        entity_key: &str,
        control_type: ControlType,
    ) -> LedgerResult<Option<ControlRecord>> {
        self.store.find(entity_key, control_type)
    }

    /// Finds the row for `(entity_key, control_type)` and enters it for a new
    /// attempt, or creates it.
    ///
    /// - A `SUCCESS` row is returned unchanged
    /// - An `ERROR` / `PENDING` / `PROCESSING` row gets the new payload,
    ///   `PROCESSING`, `attempts + 1`, and cleared error/response
    /// - A missing row is created with `attempts = 1`, `PROCESSING`
    ///
    /// Returns the row and whether this call created it.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::AttemptsExhausted`] when the attempt cap is
    /// reached, or any store error.
    pub fn find_or_create(
        &self,
        entity_key: &str,
        control_type: ControlType,
        payload: &str,
    ) -> LedgerResult<(ControlRecord, bool)> {
        let _guard = self.stripe(entity_key, control_type).lock();

        if let Some(cap) = self.max_attempts {
            if let Some(existing) = self.store.find(entity_key, control_type)? {
                if !existing.is_success() && existing.attempts >= cap {
                    return Err(LedgerError::AttemptsExhausted {
                        entity_key: entity_key.to_string(),
                        control_type,
                        attempts: existing.attempts,
                    });
                }
            }
        }

        let (record, is_new) = self.store.upsert(entity_key, control_type, payload, Utc::now())?;
        debug!(
            entity_key,
            control_type = %control_type,
            status = %record.status,
            attempts = record.attempts,
            is_new,
            "ledger row entered"
        );
        Ok((record, is_new))
    }

    /// Marks a row as accepted by the insurer.
    ///
    /// # Errors
    ///
    /// Returns any store error; `record` is left updated in memory.
    pub fn mark_success(&self, record: &mut ControlRecord, response: &str) -> LedgerResult<()> {
        let _guard = self.stripe(&record.entity_key, record.control_type).lock();
        record.succeed(response, Utc::now());
        self.store.save(record)?;
        info!(
            entity_key = %record.entity_key,
            control_type = %record.control_type,
            attempts = record.attempts,
            "ledger row succeeded"
        );
        Ok(())
    }

    /// Marks a row as failed.
    ///
    /// # Errors
    ///
    /// Returns any store error; `record` is left updated in memory.
    pub fn mark_error(&self, record: &mut ControlRecord, message: &str) -> LedgerResult<()> {
        let _guard = self.stripe(&record.entity_key, record.control_type).lock();
        record.fail(message, Utc::now());
        self.store.save(record)?;
        debug!(
            entity_key = %record.entity_key,
            control_type = %record.control_type,
            attempts = record.attempts,
            error = message,
            "ledger row failed"
        );
        Ok(())
    }

    /// Returns every row, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub fn records(&self, status: Option<ControlStatus>) -> LedgerResult<Vec<ControlRecord>> {
        let mut rows = self.store.records()?;
        if let Some(status) = status {
            rows.retain(|r| r.status == status);
        }
        Ok(rows)
    }
}
