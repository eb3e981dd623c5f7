//! Entity kinds, control types and ledger statuses.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The entity universe being synchronized.
///
/// Each kind has its own ledger, its own remote endpoints and its own
/// phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Contracting companies, keyed by company code.
    Company,
    /// Beneficiaries, keyed by matriculation code.
    Beneficiary,
}

impl EntityKind {
    /// All entity kinds.
    pub const ALL: [EntityKind; 2] = [EntityKind::Company, EntityKind::Beneficiary];

    /// Returns the lowercase name used in paths and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Beneficiary => "beneficiary",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" | "empresa" => Ok(EntityKind::Company),
            "beneficiary" | "beneficiario" => Ok(EntityKind::Beneficiary),
            _ => Err(ProtocolError::UnknownEntityKind(s.to_string())),
        }
    }
}

/// Which operation kind a ledger record tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlType {
    /// A new entity is pushed to the insurer.
    Addition,
    /// An existing entity's data changed.
    Alteration,
    /// The entity is inactivated at the insurer.
    Exclusion,
}

impl ControlType {
    /// All control types in declaration order.
    pub const ALL: [ControlType; 3] = [
        ControlType::Addition,
        ControlType::Alteration,
        ControlType::Exclusion,
    ];

    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            ControlType::Addition => 1,
            ControlType::Alteration => 2,
            ControlType::Exclusion => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(ControlType::Addition),
            2 => Some(ControlType::Alteration),
            3 => Some(ControlType::Exclusion),
            _ => None,
        }
    }

    /// Returns the upper-case name stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Addition => "ADDITION",
            ControlType::Alteration => "ALTERATION",
            ControlType::Exclusion => "EXCLUSION",
        }
    }

    /// Returns true if the phase merges a base snapshot with a delta.
    pub fn requires_merge(&self) -> bool {
        matches!(self, ControlType::Alteration)
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADDITION" | "INCLUSION" | "ADD" => Ok(ControlType::Addition),
            "ALTERATION" | "ALTER" | "UPDATE" => Ok(ControlType::Alteration),
            "EXCLUSION" | "INACTIVATION" | "EXCLUDE" => Ok(ControlType::Exclusion),
            _ => Err(ProtocolError::UnknownControlType(s.to_string())),
        }
    }
}

/// Ledger record status.
///
/// ```text
/// (new) ──► PROCESSING ──► SUCCESS (terminal)
///               │  ▲
///               ▼  │ re-entry on next run
///             ERROR
/// ```
///
/// `PENDING` is accepted on read for rows written by other tools and is
/// re-entered like `ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlStatus {
    /// Queued but not yet attempted.
    Pending,
    /// An attempt is in flight, or was interrupted.
    Processing,
    /// The insurer accepted the change.
    Success,
    /// The last attempt failed.
    Error,
}

impl ControlStatus {
    /// Returns true for the sticky terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControlStatus::Success)
    }

    /// Returns the upper-case name stored in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::Pending => "PENDING",
            ControlStatus::Processing => "PROCESSING",
            ControlStatus::Success => "SUCCESS",
            ControlStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ControlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(ControlStatus::Pending),
            "PROCESSING" => Ok(ControlStatus::Processing),
            "SUCCESS" => Ok(ControlStatus::Success),
            "ERROR" => Ok(ControlStatus::Error),
            _ => Err(ProtocolError::UnknownStatus(s.to_string())),
        }
    }
}
