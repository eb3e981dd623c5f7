//! JSON configuration file.

use odontosync_engine::{
    AuthEndpoints, HttpEndpoints, SyncConfig, SyncError, TokenConfig, DEFAULT_PAGE_SIZE,
};
use odontosync_protocol::{ControlType, EntityKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("invalid config {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// The values do not form a usable configuration.
    #[error("invalid config: {0}")]
    Invalid(#[from] SyncError),

    /// An entity kind has no remote endpoints.
    #[error("no endpoints configured for {0}")]
    MissingEndpoints(EntityKind),
}

fn default_ledger_dir() -> PathBuf {
    PathBuf::from("ledger")
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("source")
}

fn default_timeout_secs() -> u64 {
    30
}

/// The whole configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Root of the per-entity ledger directories.
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: PathBuf,
    /// Root of the per-entity candidate files.
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    /// HTTP timeout for every insurer call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Engine settings.
    #[serde(default)]
    pub sync: SyncSection,
    /// Token endpoints and credentials.
    pub auth: AuthEndpoints,
    /// Remote endpoints per entity kind.
    #[serde(default)]
    pub endpoints: BTreeMap<EntityKind, HttpEndpoints>,
}

/// The `sync` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Candidates per page.
    pub page_size: u32,
    /// Workers per page.
    pub workers: usize,
    /// Consecutive authentication failures that abort a phase.
    pub auth_failure_limit: Option<u32>,
    /// Attempt cap per ledger row.
    pub max_attempts: Option<u32>,
    /// Seconds subtracted from token TTLs.
    pub safety_margin_secs: u64,
    /// Fields normalized as dates.
    pub date_fields: Vec<String>,
    /// Required fields per control type.
    pub required_fields: BTreeMap<ControlType, Vec<String>>,
    /// Phase order overrides per entity kind.
    pub phase_orders: BTreeMap<EntityKind, Vec<ControlType>>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            workers: 1,
            auth_failure_limit: None,
            max_attempts: None,
            safety_margin_secs: TokenConfig::default().safety_margin.as_secs(),
            date_fields: Vec::new(),
            required_fields: BTreeMap::new(),
            phase_orders: BTreeMap::new(),
        }
    }
}

impl FileConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: FileConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.sync_config().validate()?;
        Ok(config)
    }

    /// Builds the engine configuration.
    pub fn sync_config(&self) -> SyncConfig {
        let section = &self.sync;
        let mut config = SyncConfig::new()
            .with_page_size(section.page_size)
            .with_workers(section.workers)
            .with_date_fields(section.date_fields.iter().cloned())
            .with_token(TokenConfig::new(Duration::from_secs(
                section.safety_margin_secs,
            )));
        config.auth_failure_limit = section.auth_failure_limit;
        config.max_attempts = section.max_attempts;
        for (kind, fields) in &section.required_fields {
            config = config.with_required_fields(*kind, fields.iter().cloned());
        }
        for (entity, order) in &section.phase_orders {
            config = config.with_phase_order(*entity, order.clone());
        }
        config
    }

    /// Returns the remote endpoints of an entity kind.
    pub fn endpoints_for(&self, entity: EntityKind) -> Result<HttpEndpoints, ConfigError> {
        self.endpoints
            .get(&entity)
            .cloned()
            .ok_or(ConfigError::MissingEndpoints(entity))
    }

    /// Returns the ledger directory of an entity kind.
    pub fn ledger_path(&self, entity: EntityKind) -> PathBuf {
        self.ledger_dir.join(entity.as_str())
    }

    /// Returns the HTTP timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
