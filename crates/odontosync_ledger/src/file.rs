//! File-based ledger store for persistent storage.
//!
//! Layout of a ledger directory:
//!
//! ```text
//! <ledger_dir>/
//! ├─ LOCK              # Advisory lock for single-writer
//! └─ ledger.jsonl      # Append-only log, one JSON row per line
//! ```
//!
//! Every `insert` and `save` appends the full row. Replay keeps the last line
//! seen for each key, so the log doubles as the audit trail of every state a
//! row went through. [`FileLedgerStore::compact`] rewrites the log down to one
//! line per row.

use crate::error::{LedgerError, LedgerResult};
use crate::record::ControlRecord;
use crate::store::LedgerStore;
use fs2::FileExt;
use odontosync_protocol::ControlType;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "ledger.jsonl";
/// Temporary file for atomic compaction.
const LOG_TEMP: &str = "ledger.jsonl.tmp";

type Key = (String, ControlType);

struct Inner {
    log: File,
    rows: BTreeMap<Key, ControlRecord>,
    /// Number of row lines currently in the log.
    lines: usize,
}

/// A persistent ledger store backed by an append-only JSON-lines log.
///
/// # Thread Safety
///
/// The store is `Send + Sync`; writes are serialized by an internal mutex.
/// The store also holds an exclusive advisory lock on the directory, so a
/// second process opening the same ledger gets [`LedgerError::Locked`]. This
/// is what makes the uniqueness constraint hold across process instances.
///
/// # Durability
///
/// Each write is flushed and `sync_data`-ed before the call returns.
///
/// # Example
///
/// ```no_run
/// use odontosync_ledger::{ControlLedger, FileLedgerStore};
/// use odontosync_protocol::ControlType;
/// use std::path::Path;
///
/// let store = FileLedgerStore::open(Path::new("ledger/company")).unwrap();
/// let ledger = ControlLedger::new(store);
/// ledger.find_or_create("EMP001", ControlType::Addition, "{}").unwrap();
/// ```
pub struct FileLedgerStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    _lock_file: File,
}

impl std::fmt::Debug for FileLedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLedgerStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileLedgerStore {
    /// Opens or creates a ledger directory and replays its log.
    ///
    /// A torn last line (no trailing newline, not valid JSON) is the mark of
    /// an interrupted write and is truncated away. Any other unreadable line
    /// is reported as [`LedgerError::Corrupt`].
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the lock (returns `Locked`)
    /// - The log holds a corrupt line
    /// - I/O errors occur
    pub fn open(path: &Path) -> LedgerResult<Self> {
        fs::create_dir_all(path)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(LedgerError::Locked);
        }

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOG_FILE))?;

        let (rows, lines) = replay(&mut log)?;
        debug!(path = %path.display(), rows = rows.len(), lines, "ledger replayed");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { log, rows, lines }),
            _lock_file: lock_file,
        })
    }

    /// Returns the ledger directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of row lines in the log.
    #[must_use]
    pub fn log_lines(&self) -> usize {
        self.inner.lock().lines
    }

    /// Rewrites the log with one line per row.
    ///
    /// The new log is written to a temp file, synced, then renamed over the
    /// old one. Returns the number of superseded lines dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be written or renamed.
    pub fn compact(&self) -> LedgerResult<usize> {
        let mut inner = self.inner.lock();
        let temp_path = self.path.join(LOG_TEMP);
        let log_path = self.path.join(LOG_FILE);

        {
            let mut temp = File::create(&temp_path)?;
            for record in inner.rows.values() {
                let mut line = serde_json::to_vec(record)?;
                line.push(b'\n');
                temp.write_all(&line)?;
            }
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &log_path)?;

        inner.log = OpenOptions::new().read(true).write(true).open(&log_path)?;
        let dropped = inner.lines.saturating_sub(inner.rows.len());
        inner.lines = inner.rows.len();
        debug!(dropped, rows = inner.lines, "ledger compacted");
        Ok(dropped)
    }
}

fn replay(log: &mut File) -> LedgerResult<(BTreeMap<Key, ControlRecord>, usize)> {
    let mut contents = String::new();
    log.read_to_string(&mut contents)?;

    let mut rows = BTreeMap::new();
    let mut lines = 0usize;
    let mut offset = 0usize;

    for (idx, raw) in contents.split_inclusive('\n').enumerate() {
        let complete = raw.ends_with('\n');
        let text = raw.trim_end();

        if !text.is_empty() {
            match serde_json::from_str::<ControlRecord>(text) {
                Ok(record) => {
                    rows.insert((record.entity_key.clone(), record.control_type), record);
                    lines += 1;
                    if !complete {
                        // Row landed but its newline did not
                        log.seek(SeekFrom::End(0))?;
                        log.write_all(b"\n")?;
                        log.sync_data()?;
                    }
                }
                Err(e) if !complete => {
                    warn!(line = idx + 1, error = %e, "truncating torn ledger line");
                    log.set_len(offset as u64)?;
                    log.sync_data()?;
                    break;
                }
                Err(e) => {
                    return Err(LedgerError::Corrupt {
                        line: idx + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }

        offset += raw.len();
    }

    Ok((rows, lines))
}

fn append_row(inner: &mut Inner, record: &ControlRecord) -> LedgerResult<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    inner.log.seek(SeekFrom::End(0))?;
    inner.log.write_all(&line)?;
    inner.log.flush()?;
    inner.log.sync_data()?;
    inner.lines += 1;
    Ok(())
}

impl LedgerStore for FileLedgerStore {
    fn find(
        &self,
        entity_key: &str,
        control_type: ControlType,
    ) -> LedgerResult<Option<ControlRecord>> {
        Ok(self
            .inner
            .lock()
            .rows
            .get(&(entity_key.to_string(), control_type))
            .cloned())
    }

    fn insert(&self, record: &ControlRecord) -> LedgerResult<()> {
        let mut inner = self.inner.lock();
        let key = (record.entity_key.clone(), record.control_type);
        if inner.rows.contains_key(&key) {
            return Err(LedgerError::DuplicateKey {
                entity_key: record.entity_key.clone(),
                control_type: record.control_type,
            });
        }
        append_row(&mut inner, record)?;
        inner.rows.insert(key, record.clone());
        Ok(())
    }

    fn save(&self, record: &ControlRecord) -> LedgerResult<()> {
        let mut inner = self.inner.lock();
        let key = (record.entity_key.clone(), record.control_type);
        if !inner.rows.contains_key(&key) {
            return Err(LedgerError::NotFound {
                entity_key: record.entity_key.clone(),
                control_type: record.control_type,
            });
        }
        append_row(&mut inner, record)?;
        inner.rows.insert(key, record.clone());
        Ok(())
    }

    fn records(&self) -> LedgerResult<Vec<ControlRecord>> {
        Ok(self.inner.lock().rows.values().cloned().collect())
    }
}
