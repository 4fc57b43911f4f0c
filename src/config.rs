//! Configuration System
//!
//! Hierarchical configuration in three layers: built-in defaults, an
//! optional configuration file, and `TETHER_*` environment overrides.
//! Every tuning constant of the sync engine lives here so isolated engine
//! instances can be configured per test.

use crate::error::SyncError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TetherConfig {
    /// Remote record service settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Synchronization policy (retries, debounce, polling)
    #[serde(default)]
    pub sync: SyncPolicy,

    /// Storage paths
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl TetherConfig {
    /// Load configuration: optional file, then environment overrides.
    ///
    /// Environment variables use the `TETHER` prefix with `__` as the
    /// section separator, e.g. `TETHER_REMOTE__BASE_URL`.
    pub fn load(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("TETHER").separator("__"));
        let loaded = builder.build()?;
        Ok(loaded.try_deserialize()?)
    }
}

/// Remote record service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the record service, including any API prefix
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer credential attached to every request when present
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Collection endpoint used to refresh the local record mirror
    #[serde(default = "default_records_endpoint")]
    pub records_endpoint: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_records_endpoint() -> String {
    "/records".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            bearer_token: None,
            records_endpoint: default_records_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Synchronization policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncPolicy {
    /// Retries after the initial attempt before a task is abandoned
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,

    /// Reachability re-sampling interval for the connectivity monitor
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Online transitions within this window of a completed drain are
    /// suppressed
    #[serde(default = "default_online_debounce_ms")]
    pub online_debounce_ms: u64,

    /// Wider suppression window applied while the process is starting up
    #[serde(default = "default_startup_debounce_ms")]
    pub startup_debounce_ms: u64,

    /// Whether to run the background execution context
    #[serde(default = "default_true")]
    pub background_sync: bool,

    /// Background drain schedule
    #[serde(default = "default_background_interval_ms")]
    pub background_interval_ms: u64,
}

fn default_retry_ceiling() -> u32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1_500
}

fn default_online_debounce_ms() -> u64 {
    3_000
}

fn default_startup_debounce_ms() -> u64 {
    5_000
}

fn default_background_interval_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            retry_ceiling: default_retry_ceiling(),
            poll_interval_ms: default_poll_interval_ms(),
            online_debounce_ms: default_online_debounce_ms(),
            startup_debounce_ms: default_startup_debounce_ms(),
            background_sync: default_true(),
            background_interval_ms: default_background_interval_ms(),
        }
    }
}

impl SyncPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn online_debounce(&self) -> Duration {
        Duration::from_millis(self.online_debounce_ms)
    }

    pub fn startup_debounce(&self) -> Duration {
        Duration::from_millis(self.startup_debounce_ms)
    }

    pub fn background_interval(&self) -> Duration {
        Duration::from_millis(self.background_interval_ms)
    }
}

/// Storage paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding every store file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_fast_store_file")]
    pub fast_store_file: String,

    #[serde(default = "default_durable_store_dir")]
    pub durable_store_dir: String,

    #[serde(default = "default_mirror_file")]
    pub mirror_file: String,
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "tether")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".tether"))
}

fn default_fast_store_file() -> String {
    "queue.json".to_string()
}

fn default_durable_store_dir() -> String {
    "tasks.sled".to_string()
}

fn default_mirror_file() -> String {
    "mirror.json".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fast_store_file: default_fast_store_file(),
            durable_store_dir: default_durable_store_dir(),
            mirror_file: default_mirror_file(),
        }
    }
}

impl StorageConfig {
    pub fn fast_store_path(&self) -> PathBuf {
        self.data_dir.join(&self.fast_store_file)
    }

    pub fn durable_store_path(&self) -> PathBuf {
        self.data_dir.join(&self.durable_store_dir)
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.data_dir.join(&self.mirror_file)
    }
}
