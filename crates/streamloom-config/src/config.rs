//! TOML config-ref resolution: explicit path, `STREAMLOOM_CONFIG` env var,
//! or the default filename, read with a size cap and parsed fail-closed.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use streamloom_core::Store;
use streamloom_store_sqlite::{SqliteStore, SqliteStoreConfig, SqliteStoreError};
use thiserror::Error;

const CONFIG_ENV_VAR: &str = "STREAMLOOM_CONFIG";
const DEFAULT_CONFIG_NAME: &str = "streamloom.toml";
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

const fn default_ready_chunk_size() -> i64 {
    500
}

const fn default_expiry_chunk_size() -> i64 {
    500
}

const fn default_completed_chunk_size() -> i64 {
    500
}

const fn default_polling_rate_secs() -> u64 {
    300
}

/// Errors raised while resolving and parsing a config-ref.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file's TOML was malformed.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The config file was well-formed TOML but failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// The configured store backend could not be opened.
    #[error("store error: {0}")]
    Store(String),
}

impl From<SqliteStoreError> for ConfigError {
    fn from(err: SqliteStoreError) -> Self {
        Self::Store(err.to_string())
    }
}

/// Which `Store` backend a `[store]` table selects.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// The non-durable in-process backend.
    Memory,
    /// The `SQLite`-backed durable backend.
    Sqlite {
        /// Connection and pragma settings for the backing file.
        #[serde(flatten)]
        config: SqliteStoreConfig,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// The parsed, validated contents of a config-ref.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    store: StoreConfig,
    #[serde(default = "default_ready_chunk_size")]
    ready_chunk_size: i64,
    #[serde(default = "default_expiry_chunk_size")]
    expiry_chunk_size: i64,
    #[serde(default = "default_completed_chunk_size")]
    completed_chunk_size: i64,
    #[serde(default = "default_polling_rate_secs")]
    polling_rate_secs: u64,
}

impl PipelineConfig {
    /// Opens the configured `Store` backend.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Store`] if the `SQLite` backend cannot open
    /// its database file.
    pub fn store(&self) -> Result<Arc<dyn Store>, ConfigError> {
        match &self.store {
            StoreConfig::Memory => Ok(Arc::new(streamloom_core::InMemoryStore::new())),
            StoreConfig::Sqlite { config } => {
                let store = SqliteStore::new(config.clone())?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Number of streams a trigger-check pass scans per trigger. `<= 0`
    /// means no chunking: one pass scans every collecting stream.
    #[must_use]
    pub const fn ready_chunk_size(&self) -> i64 {
        self.ready_chunk_size
    }

    /// Number of streams a ready-processor pass claims per trigger. `<= 0`
    /// means no chunking.
    #[must_use]
    pub const fn expiry_chunk_size(&self) -> i64 {
        self.expiry_chunk_size
    }

    /// Number of processed streams a purge pass removes per trigger. `<= 0`
    /// means no chunking.
    #[must_use]
    pub const fn completed_chunk_size(&self) -> i64 {
        self.completed_chunk_size
    }

    /// Sleep interval between scheduler passes.
    #[must_use]
    pub const fn polling_rate(&self) -> Duration {
        Duration::from_secs(self.polling_rate_secs)
    }
}

/// Loads a `PipelineConfig` from `path`, or the `STREAMLOOM_CONFIG` env var,
/// or [`DEFAULT_CONFIG_NAME`] if neither is given.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the resolved path cannot be read,
/// [`ConfigError::Parse`] if its contents are not valid TOML, or
/// [`ConfigError::Invalid`] if the path or file size is out of bounds.
pub fn load(path: Option<&Path>) -> Result<PipelineConfig, ConfigError> {
    let resolved = resolve_path(path)?;
    validate_path(&resolved)?;
    let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    let content = std::str::from_utf8(&bytes)
        .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
    let config: PipelineConfig = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
    Ok(config)
}

fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}
