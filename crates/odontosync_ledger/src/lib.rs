//! # OdontoSync Ledger
//!
//! The control ledger: one row per `(entity key, control type)` recording
//! every attempt to push that change to the insurer.
//!
//! The ledger is the single point of truth across runs. It provides:
//! - [`ControlRecord`], the persisted row
//! - [`LedgerStore`], the storage seam with a uniqueness guarantee
//! - [`InMemoryLedgerStore`] for tests and dry runs
//! - [`FileLedgerStore`], an append-only JSON-lines log guarded by a `LOCK` file
//! - [`ControlLedger`], the idempotent find-or-create / mark API
//!
//! ## Invariants
//!
//! - At most one row per `(entity key, control type)`
//! - A `SUCCESS` row is never re-entered, overwritten or re-created
//! - `attempts` never decreases
//! - Rows are never deleted
//!
//! ## Example
//!
//! ```rust
//! use odontosync_ledger::{ControlLedger, InMemoryLedgerStore};
//! use odontosync_protocol::{ControlStatus, ControlType};
//!
//! let ledger = ControlLedger::new(InMemoryLedgerStore::new());
//! let (mut record, is_new) = ledger
//!     .find_or_create("EMP001", ControlType::Addition, "{}")
//!     .unwrap();
//! assert!(is_new);
//! ledger.mark_success(&mut record, "accepted").unwrap();
//! assert_eq!(record.status, ControlStatus::Success);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod error;
mod file;
mod ledger;
mod memory;
mod record;
mod store;

pub use error::{LedgerError, LedgerResult};
pub use file::FileLedgerStore;
pub use ledger::ControlLedger;
pub use memory::InMemoryLedgerStore;
pub use record::ControlRecord;
pub use store::LedgerStore;
