//! praxis.toml configuration parser.
//!
//! The backend selector decides which concrete storage adapters the
//! factory constructs. Unrecognized selector tokens are a configuration
//! error, reported at parse time rather than first use.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown backend: {0:?} (expected in-memory, file-embedded, distributed-cache, or distributed-broker)")]
    UnknownBackend(String),
}

/// Which family of storage/queue adapters to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// In-process reference adapters (testing, demo).
    InMemory,
    /// redb-backed key-value store on local disk.
    FileEmbedded,
    /// Redis-compatible cache (key-value + pub/sub).
    DistributedCache,
    /// Redis-backed distributed task broker.
    DistributedBroker,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::InMemory => "in-memory",
            BackendKind::FileEmbedded => "file-embedded",
            BackendKind::DistributedCache => "distributed-cache",
            BackendKind::DistributedBroker => "distributed-broker",
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-memory" => Ok(BackendKind::InMemory),
            "file-embedded" => Ok(BackendKind::FileEmbedded),
            "distributed-cache" => Ok(BackendKind::DistributedCache),
            "distributed-broker" => Ok(BackendKind::DistributedBroker),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selector.
    pub backend: BackendKind,
    /// Database path (file-embedded backend).
    pub path: Option<PathBuf>,
    /// Connection URL (distributed backends).
    pub url: Option<String>,
    /// Worker count for the task queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Key namespace shared by distributed adapters.
    pub namespace: Option<String>,
}

fn default_workers() -> usize {
    4
}

impl StoreConfig {
    /// Config for the in-memory reference backend.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::InMemory,
            path: None,
            url: None,
            workers: default_workers(),
            namespace: None,
        }
    }

    /// Config for the file-embedded backend at the given path.
    pub fn file_embedded(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::FileEmbedded,
            path: Some(path.into()),
            url: None,
            workers: default_workers(),
            namespace: None,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Top-level Praxis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PraxisConfig {
    pub store: StoreConfig,
}

impl PraxisConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PraxisConfig = toml::from_str(content)?;
        Ok(config)
    }
}
