//! Configuration type definitions.
//!
//! Engine settings (`secdet.yaml`) and the case catalog file.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::core::case::RiskLevel;

/// Engine configuration (secdet.yaml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory case script paths are resolved against.
    pub scripts_dir: PathBuf,
    /// Directory execution logs are written to.
    pub logs_dir: PathBuf,
    /// Per-script timeout in seconds.
    pub script_timeout_secs: u64,
    /// Interpreter for `.py` scripts.
    pub python: String,
    /// Interpreter for `.sh` scripts.
    pub shell: String,
    /// Tasks executed at once by the dispatcher.
    pub worker_concurrency: usize,
    /// Run requests buffered before submission waits.
    pub queue_capacity: usize,
    /// Retries allowed per unit.
    pub max_retries: u32,
    /// WebSocket heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    pub storage: StorageConfig,
    pub api: ApiConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("/data/scripts"),
            logs_dir: PathBuf::from("/data/logs"),
            script_timeout_secs: 300,
            python: "python3".to_string(),
            shell: "bash".to_string(),
            worker_concurrency: 4,
            queue_capacity: 64,
            max_retries: 3,
            heartbeat_interval_secs: 30,
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// HTTP API listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8565,
        }
    }
}

impl ApiConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Case catalog file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub categories: Vec<CategoryConfig>,
}

/// A category and its cases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub name: String,
    /// Omitted means "after the last category".
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub cases: Vec<CaseConfig>,
}

/// One case entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseConfig {
    pub name: String,
    pub risk_level: RiskLevel,
    /// Relative to the engine's `scripts_dir`.
    pub script: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub description: Option<String>,
    pub fix_suggestion: Option<String>,
}

fn default_true() -> bool {
    true
}
