//! Compact command implementation.

use super::entities;
use crate::config::FileConfig;
use odontosync_ledger::{FileLedgerStore, LedgerStore};
use odontosync_protocol::EntityKind;

/// Rewrites ledger logs with one line per row.
pub fn run(
    config: &FileConfig,
    entity: Option<EntityKind>,
    dry_run: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if dry_run {
        println!("(dry run - no changes will be made)");
        println!();
    }

    for entity in entities(entity) {
        let path = config.ledger_path(entity);
        if !path.exists() {
            println!("{entity}: no ledger at {}", path.display());
            continue;
        }

        let store = FileLedgerStore::open(&path)?;
        let lines = store.log_lines();
        let rows = store.records()?.len();
        println!("{entity}: {lines} log line(s), {rows} row(s)");

        if dry_run {
            println!("  would drop {} superseded line(s)", lines.saturating_sub(rows));
        } else if lines > rows {
            let dropped = store.compact()?;
            println!("  ✓ dropped {dropped} superseded line(s)");
        } else {
            println!("  already compact");
        }
    }
    Ok(())
}
