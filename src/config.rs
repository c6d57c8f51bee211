//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` and `[server]` may be omitted; missing keys
//! fall back to the defaults below.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("./document-storage")
}
fn default_max_file_size() -> u64 {
    50 * 1024 * 1024
}

/// Work queue topology and delivery settings.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    #[serde(default = "default_routing_key")]
    pub routing_key: String,
    /// How long a received message stays invisible before it is
    /// redelivered, unless settled first.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// Deliveries after which a requeued message is dead-lettered.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            queue: default_queue(),
            routing_key: default_routing_key(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_deliveries: default_max_deliveries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_exchange() -> String {
    "document.exchange".to_string()
}
fn default_queue() -> String {
    "document.index.queue".to_string()
}
fn default_routing_key() -> String {
    "document.index".to_string()
}
fn default_visibility_timeout_secs() -> u64 {
    300
}
fn default_max_deliveries() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_extraction_timeout_secs")]
    pub extraction_timeout_secs: u64,
    /// Period of the background consistency sweep. `0` disables it.
    #[serde(default)]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_stale_processing_secs")]
    pub stale_processing_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            extraction_timeout_secs: default_extraction_timeout_secs(),
            sweep_interval_secs: 0,
            stale_processing_secs: default_stale_processing_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_extraction_timeout_secs() -> u64 {
    120
}
fn default_stale_processing_secs() -> u64 {
    900
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "default_max_results_limit")]
    pub max_results_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_length: default_snippet_length(),
            max_query_length: default_max_query_length(),
            default_max_results: default_max_results(),
            max_results_limit: default_max_results_limit(),
        }
    }
}

fn default_snippet_length() -> usize {
    200
}
fn default_max_query_length() -> usize {
    500
}
fn default_max_results() -> usize {
    100
}
fn default_max_results_limit() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let queue = &config.queue;
    if queue.exchange.trim().is_empty()
        || queue.queue.trim().is_empty()
        || queue.routing_key.trim().is_empty()
    {
        anyhow::bail!("queue.exchange, queue.queue and queue.routing_key must not be empty");
    }
    if queue.max_deliveries == 0 {
        anyhow::bail!("queue.max_deliveries must be >= 1");
    }
    if queue.visibility_timeout_secs == 0 {
        anyhow::bail!("queue.visibility_timeout_secs must be >= 1");
    }

    if config.worker.concurrency == 0 {
        anyhow::bail!("worker.concurrency must be >= 1");
    }
    if config.worker.extraction_timeout_secs == 0 {
        anyhow::bail!("worker.extraction_timeout_secs must be >= 1");
    }

    let search = &config.search;
    if search.snippet_length == 0 {
        anyhow::bail!("search.snippet_length must be >= 1");
    }
    if search.default_max_results == 0 || search.max_results_limit == 0 {
        anyhow::bail!("search.default_max_results and search.max_results_limit must be >= 1");
    }
    if search.default_max_results > search.max_results_limit {
        anyhow::bail!(
            "search.default_max_results ({}) must not exceed search.max_results_limit ({})",
            search.default_max_results,
            search.max_results_limit
        );
    }

    if config.storage.max_file_size == 0 {
        anyhow::bail!("storage.max_file_size must be > 0");
    }

    Ok(())
}
