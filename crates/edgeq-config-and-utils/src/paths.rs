//! File system paths for EdgeQ.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Manages file system paths for the queue.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for runtime files (~/.edgeq)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.edgeq`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self {
            base_dir: home.join(".edgeq"),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.edgeq).
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.edgeq/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the default store path (~/.edgeq/queue.db).
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("queue.db")
    }

    /// Get the logs directory (~/.edgeq/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.edgeq/logs/edgeq.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("edgeq.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
