//! Field maps read from the ERP views.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A flat field map as read from one ERP view row.
///
/// Keys are kept sorted so the serialized payload is stable across runs,
/// which keeps ledger payload diffs readable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts or replaces a field.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Removes a field, returning its previous value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    /// Returns the raw value of a field.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Returns the value only if it is present and not blank.
    pub fn present(&self, name: &str) -> Option<&str> {
        self.get(name).filter(|v| !v.trim().is_empty())
    }

    /// Returns true if the field holds a non-blank value.
    pub fn is_present(&self, name: &str) -> bool {
        self.present(name).is_some()
    }

    /// Iterates over field names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Iterates over `(name, value)` pairs in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One candidate row returned by a source page.
///
/// `fields` is the row from the phase's own view. For alteration candidates
/// the source also joins the complete snapshot into `base`, and `fields`
/// holds the delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Business identifier the ledger is keyed on.
    pub key: String,
    /// Phase view row (the delta for alterations).
    pub fields: Record,
    /// Complete snapshot, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<Record>,
}

impl SourceRecord {
    /// Creates a candidate without a base snapshot.
    pub fn new(key: impl Into<String>, fields: Record) -> Self {
        Self {
            key: key.into(),
            fields,
            base: None,
        }
    }

    /// Attaches the complete snapshot.
    pub fn with_base(mut self, base: Record) -> Self {
        self.base = Some(base);
        self
    }
}

/// The chained token pair presented to the insurer's API.
///
/// The [`Debug`] impl redacts both values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Primary (gateway) access token.
    pub primary: String,
    /// Secondary, domain-scoped token obtained by exchanging the primary.
    pub secondary: String,
}

impl Credentials {
    /// Creates a credential pair.
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("primary", &"[REDACTED]")
            .field("secondary", &"[REDACTED]")
            .finish()
    }
}
