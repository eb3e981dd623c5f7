//! # OdontoSync Engine
//!
//! Synchronization control and batch engine between the hospital ERP and the
//! insurer's API.
//!
//! This crate provides:
//! - Chained token cache (primary gateway token, secondary domain token)
//! - Field merger for the complete and delta views
//! - Paginated batch processor with per-item failure isolation
//! - Sync orchestrator running phases in per-entity order
//! - Ports for auth, remote and source collaborators, with mocks
//! - HTTP adapters over a pluggable client
//!
//! ## Architecture
//!
//! Every candidate goes through the same pipeline:
//! 1. Build the payload (merging base and delta for alterations)
//! 2. Enter the control ledger (a success short-circuits the item)
//! 3. Obtain credentials from the token cache
//! 4. Submit to the insurer
//! 5. Record success or error in the ledger
//!
//! ## Key Invariants
//!
//! - At most one successful submission per entity key and control type
//! - One failing item never stops the rest of its phase
//! - One failing phase never stops the next phase
//! - At most one token refresh in flight per token slot

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batch;
mod clock;
mod config;
mod error;
mod http;
mod instrument;
mod merge;
mod orchestrator;
mod ports;
mod token;

pub use batch::{BatchAbort, BatchResult, ItemOutcome, PaginatedBatchProcessor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    default_phase_order, SyncConfig, TokenConfig, DEFAULT_PAGE_SIZE, DEFAULT_SAFETY_MARGIN,
};
pub use error::{ErrorKind, SyncError, SyncResult, CONTEXT_HTTP_STATUS};
pub use http::{
    AuthEndpoints, HttpAuthPort, HttpClient, HttpEndpoints, HttpMethod, HttpRemotePort,
    HttpRequest, HttpResponse, RemoteRoute, DEFAULT_SECONDARY_HEADER, DEFAULT_TOKEN_TTL_SECS,
};
pub use instrument::{with_logging, with_timing};
pub use merge::{missing_required, FieldMerger, DATE_FORMAT};
pub use orchestrator::{
    OrchestratorState, PhaseOutcome, PhaseReport, RunReport, SyncOrchestrator, SyncStats,
};
pub use ports::{
    AuthPort, IssuedToken, MemorySource, MockAuth, MockRemote, RemotePort, SourcePort, Submission,
};
pub use token::{TokenCache, TokenStats};
