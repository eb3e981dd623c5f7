//! Ledger command implementation.

use super::entities;
use crate::config::FileConfig;
use odontosync_ledger::{ControlLedger, ControlRecord, FileLedgerStore};
use odontosync_protocol::{ControlStatus, EntityKind};
use serde::Serialize;

/// One listed row.
#[derive(Debug, Serialize)]
pub struct LedgerRow {
    /// Entity kind of the ledger.
    pub entity: EntityKind,
    /// The row.
    #[serde(flatten)]
    pub record: ControlRecord,
}

/// Per-status counts of one ledger.
#[derive(Debug, Default, Serialize)]
pub struct LedgerSummary {
    /// Rows pending.
    pub pending: usize,
    /// Rows being processed or interrupted mid-attempt.
    pub processing: usize,
    /// Rows accepted by the insurer.
    pub success: usize,
    /// Rows whose last attempt failed.
    pub error: usize,
}

impl LedgerSummary {
    fn count(&mut self, status: ControlStatus) {
        match status {
            ControlStatus::Pending => self.pending += 1,
            ControlStatus::Processing => self.processing += 1,
            ControlStatus::Success => self.success += 1,
            ControlStatus::Error => self.error += 1,
        }
    }
}

/// Lists ledger rows, optionally filtered by status and key.
pub fn run(
    config: &FileConfig,
    entity: Option<EntityKind>,
    status: Option<ControlStatus>,
    key: Option<&str>,
    show_payload: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rows = Vec::new();
    let mut summaries = Vec::new();

    for entity in entities(entity) {
        let path = config.ledger_path(entity);
        if !path.exists() {
            continue;
        }
        let ledger = ControlLedger::new(FileLedgerStore::open(&path)?);
        let all = ledger.records(None)?;

        let mut summary = LedgerSummary::default();
        for record in &all {
            summary.count(record.status);
        }
        summaries.push((entity, summary));

        rows.extend(
            all.into_iter()
                .filter(|r| status.map_or(true, |s| r.status == s))
                .filter(|r| key.map_or(true, |k| r.entity_key == k))
                .map(|record| LedgerRow { entity, record }),
        );
    }

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for (entity, summary) in &summaries {
        println!(
            "{entity}: {} success, {} error, {} processing, {} pending",
            summary.success, summary.error, summary.processing, summary.pending
        );
    }
    if summaries.is_empty() {
        println!("No ledger found under {}", config.ledger_dir.display());
        return Ok(());
    }
    println!();

    for row in &rows {
        let r = &row.record;
        println!(
            "{:<12} {:<20} {:<11} {:<11} attempts={:<3} last={}",
            row.entity.as_str(),
            r.entity_key,
            r.control_type.as_str(),
            r.status.as_str(),
            r.attempts,
            r.last_attempt_at.format("%Y-%m-%d %H:%M:%S"),
        );
        if let Some(err) = &r.error_message {
            println!("    error:    {err}");
        }
        if show_payload {
            if let Some(payload) = &r.payload {
                println!("    payload:  {payload}");
            }
            if let Some(response) = &r.response {
                println!("    response: {response}");
            }
        }
    }
    println!();
    println!("{} row(s)", rows.len());
    Ok(())
}
