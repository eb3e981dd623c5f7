//! Candidate source backed by JSON export files.
//!
//! The ERP export job drops one file per entity kind and phase:
//!
//! ```text
//! <source_dir>/<entity>/<addition|alteration|exclusion>.json
//! ```
//!
//! Each file is a JSON array of candidates (`key`, `fields`, optional
//! `base`). Counting a phase's candidates parses the file into a sorted
//! snapshot; every page of that phase is sliced from the snapshot. A newer
//! export is picked up by the next phase.

use odontosync_engine::{SourcePort, SyncError, SyncResult};
use odontosync_protocol::{ControlType, EntityKind, SourceRecord};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Reads candidates for one entity kind from its export directory.
#[derive(Debug)]
pub struct JsonSource {
    dir: PathBuf,
    snapshots: Mutex<HashMap<ControlType, Arc<Vec<SourceRecord>>>>,
}

impl JsonSource {
    /// Creates a source over `<root>/<entity>`.
    pub fn new(root: &Path, entity: EntityKind) -> Self {
        Self {
            dir: root.join(entity.as_str()),
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the file holding the candidates of a phase.
    pub fn file_for(&self, kind: ControlType) -> PathBuf {
        self.dir
            .join(format!("{}.json", kind.as_str().to_ascii_lowercase()))
    }

    fn load(&self, kind: ControlType) -> SyncResult<Vec<SourceRecord>> {
        let path = self.file_for(kind);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(SyncError::page_fetch(format!(
                    "cannot read {}: {err}",
                    path.display()
                )))
            }
        };
        let mut records: Vec<SourceRecord> = serde_json::from_str(&text).map_err(|err| {
            SyncError::page_fetch(format!("cannot parse {}: {err}", path.display()))
        })?;
        records.sort_by(|a, b| a.key.cmp(&b.key));
        debug!(path = %path.display(), records = records.len(), "export loaded");
        Ok(records)
    }

    /// Parses the export of `kind` and makes it the snapshot pages read from.
    fn refresh(&self, kind: ControlType) -> SyncResult<Arc<Vec<SourceRecord>>> {
        let records = Arc::new(self.load(kind)?);
        self.snapshots.lock().insert(kind, Arc::clone(&records));
        Ok(records)
    }

    fn snapshot(&self, kind: ControlType) -> SyncResult<Arc<Vec<SourceRecord>>> {
        let cached = self.snapshots.lock().get(&kind).cloned();
        match cached {
            Some(records) => Ok(records),
            None => self.refresh(kind),
        }
    }
}

impl SourcePort for JsonSource {
    fn count_candidates(&self, kind: ControlType) -> SyncResult<u64> {
        Ok(self.refresh(kind)?.len() as u64)
    }

    fn fetch_page(
        &self,
        kind: ControlType,
        offset: u64,
        limit: u32,
    ) -> SyncResult<Vec<SourceRecord>> {
        let records = self.snapshot(kind)?;
        let start = usize::try_from(offset)
            .unwrap_or(usize::MAX)
            .min(records.len());
        let end = start.saturating_add(limit as usize).min(records.len());
        Ok(records[start..end].to_vec())
    }
}
