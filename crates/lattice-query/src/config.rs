//! Engine configuration

use std::path::Path;
use std::time::Duration;

use lattice_core::limits::{
    validate_ids_per_request, validate_page_size, DEFAULT_IDS_PER_REQUEST, DEFAULT_PAGE_SIZE,
};
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Settings that shape how a plan is executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rows requested per service call at most
    #[serde(default = "default_page_size")]
    pub max_page_size: usize,

    /// Identifiers sent in one hop request before the set is chunked
    #[serde(default = "default_ids_per_request")]
    pub max_ids_per_request: usize,

    /// Orphan policy used when a caller does not pass one
    #[serde(default = "default_true")]
    pub remove_not_connected: bool,

    /// Fetch sibling steps at the same depth concurrently
    #[serde(default)]
    pub parallel_siblings: bool,

    /// Upper bound on one execute call, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_ids_per_request() -> usize {
    DEFAULT_IDS_PER_REQUEST
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_page_size(),
            max_ids_per_request: default_ids_per_request(),
            remove_not_connected: true,
            parallel_siblings: false,
            timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> QueryResult<Self> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> QueryResult<Self> {
        let path = path.as_ref();
        tracing::debug!("Loading engine config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> QueryResult<()> {
        validate_page_size(self.max_page_size).map_err(|e| QueryError::Config(e.to_string()))?;
        validate_ids_per_request(self.max_ids_per_request)
            .map_err(|e| QueryError::Config(e.to_string()))?;
        if self.timeout_ms == Some(0) {
            return Err(QueryError::Config("timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    pub fn with_ids_per_request(mut self, count: usize) -> Self {
        self.max_ids_per_request = count;
        self
    }

    pub fn with_parallel_siblings(mut self, enabled: bool) -> Self {
        self.parallel_siblings = enabled;
        self
    }

    pub fn with_remove_not_connected(mut self, enabled: bool) -> Self {
        self.remove_not_connected = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}
