//! Error types for the sync engine.
//!
//! There is one error type, [`SyncError`], tagged with an [`ErrorKind`] and
//! carrying a free-form context map. Code that needs to react differently to
//! different failures switches on [`SyncError::kind`].

use odontosync_ledger::LedgerError;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Context key holding the HTTP status of a remote failure.
pub const CONTEXT_HTTP_STATUS: &str = "http_status";

/// What went wrong, at the granularity callers react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Token fetch or exchange failed.
    Authentication,
    /// Network failure, 4xx/5xx or timeout from the insurer.
    RemoteCommunication,
    /// A required field was missing before any network call.
    Validation,
    /// The ledger could not be read or written.
    Persistence,
    /// The source could not produce a page (or a candidate count).
    PageFetch,
    /// Invalid configuration.
    Configuration,
    /// The orchestrator was asked to do something its state forbids.
    InvalidState,
    /// The ledger row reached its attempt cap.
    RetriesExhausted,
    /// A payload could not be encoded or a response decoded.
    Codec,
    /// An item handler panicked.
    Internal,
}

impl ErrorKind {
    /// Returns a stable lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::RemoteCommunication => "remote_communication",
            ErrorKind::Validation => "validation",
            ErrorKind::Persistence => "persistence",
            ErrorKind::PageFetch => "page_fetch",
            ErrorKind::Configuration => "configuration",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Codec => "codec",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct SyncError {
    kind: ErrorKind,
    message: String,
    context: BTreeMap<String, String>,
}

impl SyncError {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Creates an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Creates a remote communication error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteCommunication, message)
    }

    /// Creates a remote communication error carrying the HTTP status.
    pub fn remote_status(status: u16, message: impl Into<String>) -> Self {
        Self::remote(message).with_context(CONTEXT_HTTP_STATUS, status.to_string())
    }

    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Creates a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    /// Creates a page fetch error.
    pub fn page_fetch(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PageFetch, message)
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    /// Attaches a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the message without the kind prefix.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the context map.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Returns the HTTP status recorded by a remote failure.
    pub fn http_status(&self) -> Option<u16> {
        self.context
            .get(CONTEXT_HTTP_STATUS)
            .and_then(|s| s.parse().ok())
    }

    /// Returns true if the insurer rejected the credentials.
    pub fn is_unauthorized(&self) -> bool {
        self.http_status() == Some(401)
    }

    /// Returns true if a later run might succeed without any data change.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::RemoteCommunication => match self.http_status() {
                Some(status) => status >= 500 || status == 408 || status == 429,
                None => true,
            },
            ErrorKind::Authentication | ErrorKind::PageFetch | ErrorKind::Persistence => true,
            _ => false,
        }
    }
}

impl From<LedgerError> for SyncError {
    fn from(err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::AttemptsExhausted { .. } => ErrorKind::RetriesExhausted,
            _ => ErrorKind::Persistence,
        };
        SyncError::new(kind, err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::new(ErrorKind::Codec, err.to_string())
    }
}
