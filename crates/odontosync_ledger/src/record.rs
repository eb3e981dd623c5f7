//! The persisted ledger row.

use chrono::{DateTime, Utc};
use odontosync_protocol::{ControlStatus, ControlType};
use serde::{Deserialize, Serialize};

/// One row per `(entity_key, control_type)` over the lifetime of the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRecord {
    /// Company code or beneficiary matriculation.
    pub entity_key: String,
    /// Operation kind this row tracks.
    pub control_type: ControlType,
    /// Current state.
    pub status: ControlStatus,
    /// Number of times this row was entered for processing.
    pub attempts: u32,
    /// Exact request body of the latest attempt.
    pub payload: Option<String>,
    /// Exact response body of the successful attempt.
    pub response: Option<String>,
    /// Failure reason of the latest failed attempt.
    pub error_message: Option<String>,
    /// When the row was first created.
    pub created_at: DateTime<Utc>,
    /// When the row was last entered or failed.
    pub last_attempt_at: DateTime<Utc>,
    /// When the insurer accepted the change.
    pub succeeded_at: Option<DateTime<Utc>>,
}

impl ControlRecord {
    /// Creates a fresh row for a first attempt.
    pub fn new(
        entity_key: impl Into<String>,
        control_type: ControlType,
        payload: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_key: entity_key.into(),
            control_type,
            status: ControlStatus::Processing,
            attempts: 1,
            payload: Some(payload.into()),
            response: None,
            error_message: None,
            created_at: now,
            last_attempt_at: now,
            succeeded_at: None,
        }
    }

    /// Returns the uniqueness key.
    pub fn key(&self) -> (&str, ControlType) {
        (&self.entity_key, self.control_type)
    }

    /// Returns true once the insurer accepted the change.
    pub fn is_success(&self) -> bool {
        self.status.is_terminal()
    }

    /// Re-enters a non-terminal row for a new attempt.
    ///
    /// Has no effect on a `SUCCESS` row.
    pub fn reenter(&mut self, payload: impl Into<String>, now: DateTime<Utc>) {
        if self.is_success() {
            return;
        }
        self.payload = Some(payload.into());
        self.status = ControlStatus::Processing;
        self.attempts = self.attempts.saturating_add(1);
        self.error_message = None;
        self.response = None;
        self.last_attempt_at = now;
    }

    /// Records acceptance by the insurer.
    pub fn succeed(&mut self, response: impl Into<String>, now: DateTime<Utc>) {
        self.status = ControlStatus::Success;
        self.response = Some(response.into());
        self.error_message = None;
        self.succeeded_at = Some(now);
    }

    /// Records a failed attempt.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ControlStatus::Error;
        self.error_message = Some(message.into());
        self.last_attempt_at = now;
    }
}
