//! Phase orchestration.
//!
//! A [`SyncOrchestrator`] owns everything needed to sync one entity kind: the
//! candidate source, the remote port, the shared token cache and the entity's
//! control ledger. A run walks the entity's phases in their configured order;
//! each phase pages through its candidates and pushes them one by one.

use crate::batch::{BatchAbort, BatchResult, ItemOutcome, PaginatedBatchProcessor};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::instrument::{with_logging, with_timing};
use crate::merge::{missing_required, FieldMerger};
use crate::ports::{AuthPort, RemotePort, SourcePort};
use crate::token::TokenCache;
use chrono::{DateTime, Utc};
use odontosync_ledger::{ControlLedger, ControlRecord, LedgerStore};
use odontosync_protocol::{ControlType, EntityKind, Record, SourceRecord};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Lifecycle of an orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No run has started yet.
    Idle,
    /// A run is in progress.
    Running,
    /// The last run finished with every phase completing.
    Finished,
    /// The last run finished with at least one phase aborted.
    Failed,
}

impl OrchestratorState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(self, OrchestratorState::Running)
    }

    /// Returns true if a new run may start.
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }
}

/// Cumulative statistics across runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs finished, full or single-phase.
    pub runs_completed: u64,
    /// Phases executed, including aborted ones.
    pub phases_run: u64,
    /// Phases that aborted.
    pub phases_failed: u64,
    /// Items handed to the handler.
    pub items_attempted: u64,
    /// Items that ended in success.
    pub items_succeeded: u64,
    /// Items that failed.
    pub items_failed: u64,
    /// Items skipped because they were already synced.
    pub items_already_synced: u64,
    /// When the last run finished.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Last phase abort message.
    pub last_error: Option<String>,
}

/// Result of one completed phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    /// Entity kind synced.
    pub entity: EntityKind,
    /// Phase executed.
    pub kind: ControlType,
    /// Candidate count reported before the phase started.
    pub candidates: u64,
    /// Batch counters.
    pub result: BatchResult,
    /// Wall time of the phase.
    pub duration: Duration,
}

/// One phase of a full run, completed or aborted.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    /// Phase executed.
    pub kind: ControlType,
    /// Report, or the error that aborted the phase.
    pub outcome: SyncResult<PhaseReport>,
    /// Counters of items handled before an abort; zero for completed phases.
    pub partial: BatchResult,
}

/// Result of a full run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Entity kind synced.
    pub entity: EntityKind,
    /// Phases in execution order.
    pub phases: Vec<PhaseOutcome>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl RunReport {
    /// Sums the batch counters of every phase, including the items an
    /// aborted phase handled before it stopped.
    pub fn totals(&self) -> BatchResult {
        let mut totals = BatchResult::default();
        for phase in &self.phases {
            match &phase.outcome {
                Ok(report) => totals.absorb(&report.result),
                Err(_) => totals.absorb(&phase.partial),
            }
        }
        totals
    }

    /// Returns the phases that aborted.
    pub fn failed_phases(&self) -> impl Iterator<Item = (ControlType, &SyncError)> {
        self.phases
            .iter()
            .filter_map(|p| p.outcome.as_ref().err().map(|e| (p.kind, e)))
    }

    /// Returns true if every phase completed and no item failed.
    pub fn is_clean(&self) -> bool {
        self.failed_phases().next().is_none() && self.totals().failed == 0
    }
}

/// Drives the sync phases of one entity kind.
pub struct SyncOrchestrator<S, R, A, L>
where
    S: SourcePort,
    R: RemotePort,
    A: AuthPort,
    L: LedgerStore,
{
    entity: EntityKind,
    config: SyncConfig,
    source: S,
    remote: R,
    tokens: Arc<TokenCache<A>>,
    ledger: ControlLedger<L>,
    merger: FieldMerger,
    state: RwLock<OrchestratorState>,
    stats: RwLock<SyncStats>,
}

impl<S, R, A, L> SyncOrchestrator<S, R, A, L>
where
    S: SourcePort,
    R: RemotePort,
    A: AuthPort,
    L: LedgerStore,
{
    /// Creates an orchestrator for one entity kind.
    ///
    /// The token cache is shared so every entity kind reuses the same tokens.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` does not validate.
    pub fn new(
        entity: EntityKind,
        config: SyncConfig,
        source: S,
        remote: R,
        tokens: Arc<TokenCache<A>>,
        store: L,
    ) -> SyncResult<Self> {
        config.validate()?;
        let ledger = ControlLedger::new(store).with_max_attempts(config.max_attempts);
        let merger = FieldMerger::with_date_fields(config.date_fields.clone());
        Ok(Self {
            entity,
            config,
            source,
            remote,
            tokens,
            ledger,
            merger,
            state: RwLock::new(OrchestratorState::Idle),
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Returns the entity kind.
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the control ledger.
    pub fn ledger(&self) -> &ControlLedger<L> {
        &self.ledger
    }

    /// Returns the candidate source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Returns the remote port.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the shared token cache.
    pub fn tokens(&self) -> &Arc<TokenCache<A>> {
        &self.tokens
    }

    /// Gets the current state.
    pub fn state(&self) -> OrchestratorState {
        *self.state.read()
    }

    /// Gets the cumulative stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Runs every phase in the entity's configured order.
    ///
    /// A phase that aborts is logged and recorded in the report; the next
    /// phase still runs.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if a run is already in progress.
    pub fn run_full(&self) -> SyncResult<RunReport> {
        self.begin()?;
        let order = self.config.phase_order(self.entity);
        info!(entity = %self.entity, phases = order.len(), "sync run started");

        let (phases, duration) = with_timing(|| {
            order
                .into_iter()
                .map(|kind| {
                    let (outcome, partial) = self.execute_phase(kind);
                    PhaseOutcome {
                        kind,
                        outcome,
                        partial,
                    }
                })
                .collect::<Vec<_>>()
        });
        let report = RunReport {
            entity: self.entity,
            phases,
            duration,
        };

        let totals = report.totals();
        let failed_phases = report.failed_phases().count();
        info!(
            entity = %self.entity,
            attempted = totals.attempted,
            succeeded = totals.succeeded,
            failed = totals.failed,
            failed_phases,
            elapsed_ms = duration.as_millis() as u64,
            "sync run finished"
        );
        self.finish(failed_phases == 0);
        Ok(report)
    }

    /// Runs a single phase.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if a run is already in progress, or the
    /// error that aborted the phase. An abort error carries the counters of
    /// the items handled before it in its context.
    pub fn run_phase(&self, kind: ControlType) -> SyncResult<PhaseReport> {
        self.begin()?;
        let (outcome, _) = self.execute_phase(kind);
        self.finish(outcome.is_ok());
        outcome
    }

    fn begin(&self) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start() {
            return Err(SyncError::invalid_state(format!(
                "a {} sync run is already in progress",
                self.entity
            ))
            .with_context("state", format!("{:?}", *state)));
        }
        *state = OrchestratorState::Running;
        Ok(())
    }

    fn finish(&self, ok: bool) {
        {
            let mut stats = self.stats.write();
            stats.runs_completed += 1;
            stats.last_run_at = Some(Utc::now());
        }
        *self.state.write() = if ok {
            OrchestratorState::Finished
        } else {
            OrchestratorState::Failed
        };
    }

    /// Runs one phase, returning its outcome and the counters of the items it
    /// handled before an abort.
    fn execute_phase(&self, kind: ControlType) -> (SyncResult<PhaseReport>, BatchResult) {
        let (outcome, duration) = with_timing(|| self.walk_phase(kind));

        let mut stats = self.stats.write();
        stats.phases_run += 1;
        let counted = match &outcome {
            Ok((_, result)) => *result,
            Err(abort) => abort.partial,
        };
        stats.items_attempted += counted.attempted;
        stats.items_succeeded += counted.succeeded;
        stats.items_failed += counted.failed;
        stats.items_already_synced += counted.already_synced;

        match outcome {
            Ok((candidates, result)) => (
                Ok(PhaseReport {
                    entity: self.entity,
                    kind,
                    candidates,
                    result,
                    duration,
                }),
                BatchResult::default(),
            ),
            Err(abort) => {
                error!(
                    entity = %self.entity,
                    phase = %kind,
                    kind = %abort.error.kind(),
                    error = abort.error.message(),
                    attempted = abort.partial.attempted,
                    "phase aborted"
                );
                stats.phases_failed += 1;
                stats.last_error = Some(abort.error.to_string());
                let partial = abort.partial;
                (
                    Err(SyncError::from(abort).with_context("phase", kind.as_str())),
                    partial,
                )
            }
        }
    }

    fn walk_phase(&self, kind: ControlType) -> Result<(u64, BatchResult), BatchAbort> {
        let candidates = with_logging("count_candidates", || self.source.count_candidates(kind))
            .map_err(|err| {
                SyncError::page_fetch(format!("cannot count {kind} candidates: {}", err.message()))
            })?;
        if candidates == 0 {
            info!(entity = %self.entity, phase = %kind, "no candidates, phase skipped");
            return Ok((0, BatchResult::default()));
        }

        info!(entity = %self.entity, phase = %kind, candidates, "phase started");
        let processor = PaginatedBatchProcessor::new(self.config.page_size)
            .with_workers(self.config.workers)
            .with_auth_failure_limit(self.config.auth_failure_limit);
        let result = processor.process(
            |offset, limit| {
                with_logging("fetch_page", || self.source.fetch_page(kind, offset, limit))
            },
            |item| self.handle_item(kind, item),
        )?;

        info!(
            entity = %self.entity,
            phase = %kind,
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            already_synced = result.already_synced,
            "phase finished"
        );
        Ok((candidates, result))
    }

    /// Builds the outgoing field map of a candidate.
    fn outgoing_fields(&self, kind: ControlType, item: &SourceRecord) -> Record {
        match (&item.base, kind.requires_merge()) {
            (Some(base), true) => self.merger.merge(base, &item.fields),
            _ => self.merger.normalize(&item.fields),
        }
    }

    /// Handles one candidate while holding its ledger key lock, so duplicate
    /// keys drained by different workers never submit twice.
    fn handle_item(&self, kind: ControlType, item: &SourceRecord) -> SyncResult<ItemOutcome> {
        self.ledger
            .with_key_lock(&item.key, kind, || self.attempt_item(kind, item))
    }

    fn attempt_item(&self, kind: ControlType, item: &SourceRecord) -> SyncResult<ItemOutcome> {
        let fields = self.outgoing_fields(kind, item);
        let payload = serde_json::to_string(&fields)?;

        let (mut record, _) = self
            .ledger
            .find_or_create(&item.key, kind, &payload)
            .map_err(|err| SyncError::from(err).with_context("entity_key", item.key.clone()))?;
        if record.is_success() {
            debug!(entity_key = %item.key, phase = %kind, "already synced");
            return Ok(ItemOutcome::AlreadySynced);
        }

        let missing = missing_required(&fields, self.config.required_for(kind));
        if !missing.is_empty() {
            let err = SyncError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            ));
            return Err(self.fail_item(&mut record, err));
        }

        let credentials = match self.tokens.credentials() {
            Ok(credentials) => credentials,
            Err(err) => return Err(self.fail_item(&mut record, err)),
        };

        match with_logging("submit", || self.remote.submit(kind, &payload, &credentials)) {
            Ok(response) => {
                self.record_success(&mut record, &response)?;
                debug!(
                    entity_key = %item.key,
                    phase = %kind,
                    attempts = record.attempts,
                    "item synced"
                );
                Ok(ItemOutcome::Synced)
            }
            Err(err) => {
                if err.is_unauthorized() {
                    warn!(
                        entity_key = %item.key,
                        "insurer rejected credentials, dropping secondary token"
                    );
                    self.tokens.invalidate_secondary();
                }
                Err(self.fail_item(&mut record, err))
            }
        }
    }

    /// Records an accepted submission, retrying the write once.
    ///
    /// When both writes fail the row stays `PROCESSING` and the next run sends
    /// the item again, so the insurer's response is logged at error level.
    fn record_success(&self, record: &mut ControlRecord, response: &str) -> SyncResult<()> {
        let first = match self.ledger.mark_success(record, response) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        warn!(
            entity_key = %record.entity_key,
            error = %first,
            "could not record accepted item, retrying"
        );
        self.ledger.mark_success(record, response).map_err(|err| {
            error!(
                entity_key = %record.entity_key,
                control_type = %record.control_type,
                response,
                error = %err,
                "insurer accepted item but the ledger write failed"
            );
            SyncError::from(err).with_context("entity_key", record.entity_key.clone())
        })
    }

    /// Records an item failure in the ledger and returns the error to count.
    fn fail_item(&self, record: &mut ControlRecord, err: SyncError) -> SyncError {
        if let Err(persist) = self.ledger.mark_error(record, &err.to_string()) {
            warn!(
                entity_key = %record.entity_key,
                error = %persist,
                "could not record item failure"
            );
        }
        err.with_context("entity_key", record.entity_key.clone())
    }
}
