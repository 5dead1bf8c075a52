use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{MigrateError, Result};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub downloader: DownloaderConfig,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Directory holding content-addressed attachment files.
    pub base_path: PathBuf,
    /// Allow replacing a file already present at a destination path.
    #[serde(default)]
    pub overwrite: bool,
    /// Where the index snapshot is persisted between runs.
    pub snapshot_path: PathBuf,
    /// Snapshot after every N submitted items (and always at shutdown).
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: usize,
}

#[derive(Debug, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_retry_wait_min_secs")]
    pub retry_wait_min_secs: u64,
    #[serde(default = "default_retry_wait_max_secs")]
    pub retry_wait_max_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Optional session cookies, JSON (`.json`) or `k=v; k=v` text.
    pub cookies_file: Option<PathBuf>,
}

fn default_snapshot_every() -> usize {
    25
}

fn default_concurrency() -> usize {
    5
}

fn default_retry_wait_min_secs() -> u64 {
    5
}

fn default_retry_wait_max_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    6
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self> {
        let config_content = std::fs::read_to_string(config_path).map_err(|e| {
            MigrateError::Config(format!("Failed to read config file '{}': {}", config_path, e))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }
}
