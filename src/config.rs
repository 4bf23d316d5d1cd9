//! Harvest configuration and logging setup.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings shared by the pipeline and adapters, read from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Keep development-only packages in the result
    pub include_dev: bool,

    /// Deadline applied to each pipeline stage; none by default
    pub stage_timeout_secs: Option<u64>,

    /// Filter used by [`init_tracing`] when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            include_dev: true,
            stage_timeout_secs: None,
            log_filter: "info".to_string(),
        }
    }
}

impl HarvestConfig {
    /// Loads config from a JSON file. Returns default if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }
}

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_filter`. Does nothing if a global subscriber is already set.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
