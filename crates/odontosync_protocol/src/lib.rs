//! # OdontoSync Protocol
//!
//! Shared value types for the OdontoSync control and batch engine.
//!
//! This crate provides:
//! - [`EntityKind`] for the synchronized entity universes (companies, beneficiaries)
//! - [`ControlType`] for the three operation kinds (addition, alteration, exclusion)
//! - [`ControlStatus`] for the ledger state machine
//! - [`Record`] and [`SourceRecord`] for the field maps read from the ERP views
//! - [`Credentials`] for the chained token pair sent to the insurer
//!
//! This is a pure data crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod kind;
mod record;

pub use error::{ProtocolError, ProtocolResult};
pub use kind::{ControlStatus, ControlType, EntityKind};
pub use record::{Credentials, Record, SourceRecord};
