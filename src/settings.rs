use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::retry::RetryLimits;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub locking: LockingConfig,
    #[serde(default)]
    pub retrieve: RetryLimits,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub backend: StorageKind,
    /// Filesystem root for `fs`, a bucket URL for `s3`/`gcs`/`url`, a label for `memory`.
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Override slatedb's memtable flush interval.
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_kind(),
            path: default_store_path(),
            flush_interval_ms: None,
        }
    }
}

fn default_store_kind() -> StorageKind {
    StorageKind::Fs
}

fn default_store_path() -> String {
    "/tmp/tapeq".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Fs,
    S3,
    Gcs,
    Memory,
    Url,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LockingConfig {
    /// How long to wait for a scoped lock before giving up.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    /// Human readable prefix of the agent address; the host name is used when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// An agent whose heartbeat is older than this is considered dead.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: None,
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

fn default_heartbeat_timeout_ms() -> i64 {
    60_000
}

impl AgentConfig {
    pub fn resolved_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "tapeq".to_string())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let data = fs::read_to_string(p)?;
                let cfg: Self = toml::from_str(&data)?;
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}
