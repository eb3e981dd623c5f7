//! Field-level merge of the complete and delta views.
//!
//! An alteration is sent as one payload built from two partially overlapping
//! sources: the complete snapshot of the entity and the delta of changed
//! fields. Per field the delta wins when it carries a value, the snapshot
//! fills the gaps, and a field present in neither is left out. Nothing is
//! ever defaulted.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use odontosync_protocol::Record;
use std::collections::BTreeSet;
use tracing::warn;

/// Output format of normalized dates.
pub const DATE_FORMAT: &str = "%d/%m/%Y";

const DATE_INPUTS: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y%m%d"];
const DATETIME_INPUTS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parses the date formats the ERP views are known to emit.
fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_INPUTS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_INPUTS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Merges field maps and normalizes date fields.
#[derive(Debug, Clone, Default)]
pub struct FieldMerger {
    date_fields: BTreeSet<String>,
}

impl FieldMerger {
    /// Creates a merger without date fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a merger normalizing the given date fields.
    pub fn with_date_fields(date_fields: BTreeSet<String>) -> Self {
        Self { date_fields }
    }

    /// Returns true if `field` is normalized as a date.
    pub fn is_date_field(&self, field: &str) -> bool {
        self.date_fields.contains(field)
    }

    /// Returns the value as it would be sent, or `None` if it counts as absent.
    ///
    /// Blank values are absent. Date fields are rewritten to `dd/mm/yyyy`; an
    /// unparseable date is kept trimmed and logged.
    pub fn normalize_value(&self, field: &str, value: &str) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        if !self.is_date_field(field) {
            return Some(value.to_string());
        }
        match parse_date(trimmed) {
            Some(date) => Some(date.format(DATE_FORMAT).to_string()),
            None => {
                warn!(field, value = trimmed, "unrecognized date format kept as is");
                Some(trimmed.to_string())
            }
        }
    }

    /// Returns a copy of `record` with blank fields dropped and dates
    /// normalized.
    pub fn normalize(&self, record: &Record) -> Record {
        record
            .iter()
            .filter_map(|(name, value)| self.normalize_value(name, value).map(|v| (name, v)))
            .collect()
    }

    /// Merges `delta` over `base`.
    ///
    /// For every field named by either side: the normalized delta value if
    /// present, else the normalized base value if present, else absent.
    pub fn merge(&self, base: &Record, delta: &Record) -> Record {
        let names: BTreeSet<&str> = base.names().chain(delta.names()).collect();
        names
            .into_iter()
            .filter_map(|name| {
                delta
                    .get(name)
                    .and_then(|v| self.normalize_value(name, v))
                    .or_else(|| base.get(name).and_then(|v| self.normalize_value(name, v)))
                    .map(|v| (name, v))
            })
            .collect()
    }
}

/// Returns the required fields that `record` lacks, in declaration order.
pub fn missing_required(record: &Record, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| !record.is_present(name))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn merger() -> FieldMerger {
        FieldMerger::with_date_fields(["birth_date".to_string()].into_iter().collect())
    }

    #[test]
    fn delta_wins_base_fills_gaps() {
        let base = Record::new()
            .with("name", "Ana")
            .with("plan", "GOLD")
            .with("phone", "1111");
        let delta = Record::new().with("plan", "SILVER").with("phone", "   ");

        let merged = merger().merge(&base, &delta);
        assert_eq!(merged.get("name"), Some("Ana"));
        assert_eq!(merged.get("plan"), Some("SILVER"));
        assert_eq!(merged.get("phone"), Some("1111"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn absent_everywhere_stays_absent() {
        let base = Record::new().with("email", "");
        let delta = Record::new().with("email", " ");
        let merged = merger().merge(&base, &delta);
        assert!(merged.get("email").is_none());
        assert!(merged.is_empty());
    }

    #[test]
    fn dates_normalize_before_merge() {
        let m = merger();
        for raw in [
            "1990-05-17",
            "17/05/1990",
            "17-05-1990",
            "19900517",
            "1990-05-17T00:00:00",
            "1990-05-17 08:30:00.000",
            "1990-05-17T08:30:00-03:00",
            " 1990-05-17 ",
        ] {
            assert_eq!(
                m.normalize_value("birth_date", raw).as_deref(),
                Some("17/05/1990"),
                "input {raw:?}"
            );
        }
    }

    #[test]
    fn unparseable_date_is_kept_trimmed() {
        assert_eq!(
            merger().normalize_value("birth_date", " 31/02/1990 ").as_deref(),
            Some("31/02/1990")
        );
    }

    #[test]
    fn non_date_values_are_untouched() {
        assert_eq!(
            merger().normalize_value("name", " Ana ").as_deref(),
            Some(" Ana ")
        );
    }

    #[test]
    fn normalize_drops_blank_fields() {
        let record = Record::new()
            .with("name", "Ana")
            .with("email", "  ")
            .with("birth_date", "1990-05-17");
        let normalized = merger().normalize(&record);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.get("birth_date"), Some("17/05/1990"));
    }

    #[test]
    fn missing_required_lists_blank_and_absent() {
        let record = Record::new().with("name", "Ana").with("cpf", " ");
        let required = vec!["name".to_string(), "cpf".to_string(), "plan".to_string()];
        assert_eq!(missing_required(&record, &required), ["cpf", "plan"]);
        assert!(missing_required(&record, &[]).is_empty());
    }

    fn field_map() -> impl Strategy<Value = BTreeMap<String, String>> {
        prop::collection::btree_map("[a-e]", prop_oneof!["", " ", "[a-z]{1,4}"], 0..5)
    }

    proptest! {
        #[test]
        fn merge_precedence(base in field_map(), delta in field_map()) {
            let base: Record = base.into_iter().collect();
            let delta: Record = delta.into_iter().collect();
            let merged = FieldMerger::new().merge(&base, &delta);

            for name in base.names().chain(delta.names()) {
                let expected = delta.present(name).or_else(|| base.present(name));
                prop_assert_eq!(merged.get(name), expected);
            }
            for name in merged.names() {
                prop_assert!(base.get(name).is_some() || delta.get(name).is_some());
            }
        }
    }
}
