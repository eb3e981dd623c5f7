//! Error types for ledger operations.

use odontosync_protocol::ControlType;
use std::io;
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A row could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The uniqueness constraint on `(entity key, control type)` was hit.
    #[error("duplicate ledger key ({entity_key}, {control_type})")]
    DuplicateKey {
        /// Entity key of the rejected insert.
        entity_key: String,
        /// Control type of the rejected insert.
        control_type: ControlType,
    },

    /// `save` was called for a row that was never inserted.
    #[error("no ledger row for ({entity_key}, {control_type})")]
    NotFound {
        /// Entity key looked up.
        entity_key: String,
        /// Control type looked up.
        control_type: ControlType,
    },

    /// The row kept colliding with concurrent inserts.
    #[error("ledger key ({entity_key}, {control_type}) is contended")]
    Contended {
        /// Entity key.
        entity_key: String,
        /// Control type.
        control_type: ControlType,
    },

    /// The row reached the configured attempt cap.
    #[error("ledger key ({entity_key}, {control_type}) exhausted {attempts} attempts")]
    AttemptsExhausted {
        /// Entity key.
        entity_key: String,
        /// Control type.
        control_type: ControlType,
        /// Attempts recorded so far.
        attempts: u32,
    },

    /// Another process holds the ledger directory lock.
    #[error("ledger directory is locked by another process")]
    Locked,

    /// A log line could not be replayed.
    #[error("corrupt ledger log at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        reason: String,
    },
}

impl LedgerError {
    /// Returns true if the error is the uniqueness constraint firing.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerError::DuplicateKey { .. })
    }
}
