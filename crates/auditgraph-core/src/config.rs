//! Configuration: an optional `auditgraph.toml` plus environment overrides.
//!
//! Every key is optional. Environment variables win over the file:
//! `REDIS_URL`, `NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`, `NEO4J_AUTH`
//! (`user/password`, used when no password is set) and `AUDITGRAPH_DB`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::queue::RetryPolicy;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "auditgraph.toml";

/// Connection settings for Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: "neo4j".to_string(),
            max_connections: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub redis_url: String,
    pub name: String,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub visibility_timeout_secs: u64,
    pub enqueue_timeout_ms: u64,
    /// Pause between broker polls while the queue is empty.
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            name: "neo4j-sync".to_string(),
            max_attempts: 5,
            backoff_base_ms: 1000,
            visibility_timeout_secs: 30,
            enqueue_timeout_ms: 2000,
            poll_interval_ms: 250,
        }
    }
}

impl QueueConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub stall_check_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 1000,
            stall_check_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub sqlite_path: PathBuf,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("auditdb.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self { interval_secs: 3600 }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub graph: GraphConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub source: SourceConfig,
    pub reconcile: ReconcileConfig,
}

impl SyncConfig {
    /// Load from `path`, or from `auditgraph.toml` when present, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SyncConfig = toml::from_str(&raw)
            .map_err(|e| CoreError::config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.queue.redis_url = url;
        }
        if let Some(uri) = lookup("NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = lookup("NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.graph.password = password;
        }
        if self.graph.password.is_empty() {
            if let Some(auth) = lookup("NEO4J_AUTH") {
                if let Some((user, password)) = auth.split_once('/') {
                    if !user.is_empty() && !password.is_empty() {
                        self.graph.user = user.to_string();
                        self.graph.password = password.to_string();
                    }
                }
            }
        }
        if let Some(db) = lookup("AUDITGRAPH_DB") {
            self.source.sqlite_path = PathBuf::from(db);
        }
    }
}
