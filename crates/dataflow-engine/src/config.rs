//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::{EngineError, Result};

/// Configuration for an [`Engine`](crate::Engine)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Maximum number of node executions running at the same time
    pub worker_threads: usize,
    /// Time allowed for in-flight work when the engine shuts down
    pub shutdown_timeout_ms: u64,
    /// Pending event count above which a warning is logged
    pub event_backlog_warn: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let worker_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(defaults::WORKER_THREADS);
        Self {
            worker_threads,
            shutdown_timeout_ms: defaults::SHUTDOWN_TIMEOUT_MS,
            event_backlog_warn: defaults::EVENT_BACKLOG_WARN,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    pub fn with_shutdown_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.shutdown_timeout_ms = timeout_ms;
        self
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(EngineError::Config(
                "workerThreads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
