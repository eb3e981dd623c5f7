//! Error types for protocol values.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while parsing protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Unknown entity kind name.
    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),

    /// Unknown control type name.
    #[error("unknown control type: {0}")]
    UnknownControlType(String),

    /// Unknown control status name.
    #[error("unknown control status: {0}")]
    UnknownStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::UnknownControlType("UPSERT".into());
        assert_eq!(err.to_string(), "unknown control type: UPSERT");
    }
}
