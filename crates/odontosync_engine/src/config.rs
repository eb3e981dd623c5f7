//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use odontosync_protocol::{ControlType, EntityKind};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Default page size for candidate pages.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Default safety margin subtracted from token TTLs.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Returns the phase order an entity kind runs in unless configured otherwise.
///
/// Beneficiaries must exist before they can be altered, so additions go
/// first. Obsolete companies are removed before their survivors are altered.
pub fn default_phase_order(entity: EntityKind) -> Vec<ControlType> {
    match entity {
        EntityKind::Beneficiary => vec![
            ControlType::Addition,
            ControlType::Alteration,
            ControlType::Exclusion,
        ],
        EntityKind::Company => vec![
            ControlType::Exclusion,
            ControlType::Alteration,
            ControlType::Addition,
        ],
    }
}

/// Configuration for sync runs.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Number of candidates fetched per page.
    pub page_size: u32,
    /// Worker threads draining each page. `1` processes items in page order.
    pub workers: usize,
    /// Consecutive authentication failures that abort the rest of a phase.
    pub auth_failure_limit: Option<u32>,
    /// Cap on ledger attempts per row; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Phase order per entity kind.
    pub phase_orders: BTreeMap<EntityKind, Vec<ControlType>>,
    /// Fields that must be present before a candidate is sent.
    pub required_fields: BTreeMap<ControlType, Vec<String>>,
    /// Fields normalized to `dd/mm/yyyy` before merging.
    pub date_fields: BTreeSet<String>,
    /// Token cache configuration.
    pub token: TokenConfig,
}

impl SyncConfig {
    /// Creates a configuration with defaults.
    pub fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            workers: 1,
            auth_failure_limit: None,
            max_attempts: None,
            phase_orders: EntityKind::ALL
                .iter()
                .map(|e| (*e, default_phase_order(*e)))
                .collect(),
            required_fields: BTreeMap::new(),
            date_fields: BTreeSet::new(),
            token: TokenConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the number of workers per page.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Aborts a phase after this many consecutive authentication failures.
    pub fn with_auth_failure_limit(mut self, limit: u32) -> Self {
        self.auth_failure_limit = Some(limit);
        self
    }

    /// Caps ledger attempts per row.
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }

    /// Overrides the phase order of an entity kind.
    pub fn with_phase_order(mut self, entity: EntityKind, order: Vec<ControlType>) -> Self {
        self.phase_orders.insert(entity, order);
        self
    }

    /// Declares the fields a control type requires.
    pub fn with_required_fields<I, S>(mut self, control_type: ControlType, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields
            .insert(control_type, fields.into_iter().map(Into::into).collect());
        self
    }

    /// Declares the date fields to normalize.
    pub fn with_date_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.date_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the token configuration.
    pub fn with_token(mut self, token: TokenConfig) -> Self {
        self.token = token;
        self
    }

    /// Returns the phase order for an entity kind.
    pub fn phase_order(&self, entity: EntityKind) -> Vec<ControlType> {
        self.phase_orders
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| default_phase_order(entity))
    }

    /// Returns the required fields for a control type.
    pub fn required_for(&self, control_type: ControlType) -> &[String] {
        self.required_fields
            .get(&control_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Checks the configuration for values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns a configuration error describing the first problem found.
    pub fn validate(&self) -> SyncResult<()> {
        if self.page_size == 0 {
            return Err(SyncError::config("page_size must be at least 1"));
        }
        if self.workers == 0 {
            return Err(SyncError::config("workers must be at least 1"));
        }
        if self.auth_failure_limit == Some(0) {
            return Err(SyncError::config("auth_failure_limit must be at least 1"));
        }
        if self.max_attempts == Some(0) {
            return Err(SyncError::config("max_attempts must be at least 1"));
        }
        for (entity, order) in &self.phase_orders {
            let unique: BTreeSet<_> = order.iter().collect();
            if unique.len() != order.len() {
                return Err(SyncError::config(format!(
                    "phase order for {entity} repeats a phase"
                ))
                .with_context("entity", entity.as_str()));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the token cache.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Time subtracted from each token's nominal TTL before it is considered
    /// expired.
    pub safety_margin: Duration,
}

impl TokenConfig {
    /// Creates a token configuration with the given margin.
    pub fn new(safety_margin: Duration) -> Self {
        Self { safety_margin }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_MARGIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_orders_are_per_entity() {
        let config = SyncConfig::default();
        assert_eq!(
            config.phase_order(EntityKind::Beneficiary),
            vec![
                ControlType::Addition,
                ControlType::Alteration,
                ControlType::Exclusion
            ]
        );
        assert_eq!(
            config.phase_order(EntityKind::Company),
            vec![
                ControlType::Exclusion,
                ControlType::Alteration,
                ControlType::Addition
            ]
        );
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new()
            .with_page_size(200)
            .with_workers(4)
            .with_max_attempts(5)
            .with_auth_failure_limit(3)
            .with_required_fields(ControlType::Addition, ["name", "cnpj"])
            .with_date_fields(["birth_date"])
            .with_phase_order(EntityKind::Company, vec![ControlType::Addition]);

        assert_eq!(config.page_size, 200);
        assert_eq!(config.workers, 4);
        assert_eq!(config.max_attempts, Some(5));
        assert_eq!(config.auth_failure_limit, Some(3));
        assert_eq!(config.required_for(ControlType::Addition), ["name", "cnpj"]);
        assert!(config.required_for(ControlType::Exclusion).is_empty());
        assert!(config.date_fields.contains("birth_date"));
        assert_eq!(
            config.phase_order(EntityKind::Company),
            vec![ControlType::Addition]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_page_size() {
        let err = SyncConfig::new().with_page_size(0).validate().unwrap_err();
        assert!(err.message().contains("page_size"));
    }

    #[test]
    fn validate_rejects_repeated_phase() {
        let config = SyncConfig::new().with_phase_order(
            EntityKind::Beneficiary,
            vec![ControlType::Addition, ControlType::Addition],
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn token_margin_defaults_to_five_minutes() {
        assert_eq!(TokenConfig::default().safety_margin, Duration::from_secs(300));
    }
}
