//! CLI command implementations.

pub mod compact;
pub mod ledger;
pub mod phase;
pub mod run;

use crate::client::UreqClient;
use crate::config::FileConfig;
use crate::source::JsonSource;
use odontosync_engine::{
    BatchResult, HttpAuthPort, HttpRemotePort, PhaseReport, SyncError, SyncOrchestrator,
    TokenCache,
};
use odontosync_ledger::FileLedgerStore;
use odontosync_protocol::EntityKind;
use std::sync::Arc;

/// Shared HTTP client.
pub type Client = Arc<UreqClient>;

/// Token cache over the HTTP auth port.
pub type Tokens = Arc<TokenCache<HttpAuthPort<Client>>>;

/// Fully wired orchestrator.
pub type Orchestrator =
    SyncOrchestrator<JsonSource, HttpRemotePort<Client>, HttpAuthPort<Client>, FileLedgerStore>;

/// Everything the sync commands share within one process.
pub struct Wiring {
    config: FileConfig,
    client: Client,
    tokens: Tokens,
}

impl Wiring {
    /// Creates the HTTP client and token cache.
    pub fn new(config: FileConfig) -> Self {
        let client = Arc::new(UreqClient::new(config.timeout()));
        let auth = HttpAuthPort::new(config.auth.clone(), Arc::clone(&client));
        let tokens = Arc::new(TokenCache::new(auth, config.sync_config().token));
        Self {
            config,
            client,
            tokens,
        }
    }

    /// Opens the ledger of `entity` and builds its orchestrator.
    pub fn orchestrator(
        &self,
        entity: EntityKind,
    ) -> Result<Orchestrator, Box<dyn std::error::Error>> {
        let endpoints = self.config.endpoints_for(entity)?;
        let store = FileLedgerStore::open(&self.config.ledger_path(entity))?;
        let orchestrator = SyncOrchestrator::new(
            entity,
            self.config.sync_config(),
            JsonSource::new(&self.config.source_dir, entity),
            HttpRemotePort::new(endpoints, Arc::clone(&self.client)),
            Arc::clone(&self.tokens),
            store,
        )?;
        Ok(orchestrator)
    }
}

/// Expands an optional entity filter.
pub fn entities(entity: Option<EntityKind>) -> Vec<EntityKind> {
    match entity {
        Some(entity) => vec![entity],
        None => EntityKind::ALL.to_vec(),
    }
}

/// Prints one completed phase.
pub fn print_phase(report: &PhaseReport) {
    let r = &report.result;
    println!(
        "  {:<10} candidates={:<6} attempted={:<6} succeeded={:<6} failed={:<6} already_synced={:<6} pages={:<4} ({} ms)",
        report.kind.as_str(),
        report.candidates,
        r.attempted,
        r.succeeded,
        r.failed,
        r.already_synced,
        r.pages,
        report.duration.as_millis()
    );
}

/// Prints one aborted phase with the items it handled before stopping.
pub fn print_aborted(kind: &str, err: &SyncError, partial: &BatchResult) {
    println!(
        "  {kind:<10} ABORTED after attempted={} succeeded={} failed={}: {err}",
        partial.attempted, partial.succeeded, partial.failed
    );
}

/// JSON form of a phase report.
pub fn phase_json(report: &PhaseReport) -> serde_json::Value {
    serde_json::json!({
        "entity": report.entity,
        "phase": report.kind,
        "candidates": report.candidates,
        "result": report.result,
        "duration_ms": report.duration.as_millis() as u64,
    })
}
