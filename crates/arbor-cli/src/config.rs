use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "arbor.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing setting: {0}")]
    Missing(String),
}

/// Settings read from `arbor.toml`; every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArborConfig {
    pub store: StoreConfig,
    pub import: ImportConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub instance_url: Option<String>,
    pub api_version: String,
    /// Environment variable holding the bearer token.
    pub access_token_env: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            instance_url: None,
            api_version: "60.0".to_string(),
            access_token_env: "ARBOR_ACCESS_TOKEN".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn access_token(&self) -> Result<String, ConfigError> {
        std::env::var(&self.access_token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                ConfigError::Missing(format!("access token in ${}", self.access_token_env))
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub bulk: bool,
    pub bulk_poll_interval_ms: u64,
    pub bulk_wait_secs: u64,
    pub job_cache: PathBuf,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            bulk: false,
            bulk_poll_interval_ms: 5_000,
            bulk_wait_secs: 600,
            job_cache: PathBuf::from(".arbor/bulk-jobs.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub max_records_per_file: usize,
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            max_records_per_file: arbor_export::DEFAULT_MAX_RECORDS_PER_FILE,
            output_dir: PathBuf::from("."),
        }
    }
}

/// Load an explicit config file, or `arbor.toml` when present, or defaults.
pub fn load_config(path: Option<&Path>) -> Result<ArborConfig, ConfigError> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(ArborConfig::default());
            }
            default
        }
    };
    let content = std::fs::read_to_string(&path)?;
    Ok(toml::from_str(&content)?)
}
