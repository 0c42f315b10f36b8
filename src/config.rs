//! Server configuration
//!
//! Defaults suit a local single-node server. A JSON file can override any
//! subset of fields; missing fields keep their defaults.

use crate::error::{RespVaultError, Result};
use crate::protocol::DecodeLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Semaphore;

/// When the append-only file is forced to stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Background task syncs once per second; a crash loses at most about a
    /// second of acknowledged writes.
    #[default]
    EverySecond,

    /// Sync after every append, in addition to the background task.
    Always,
}

/// RespVault server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub aof_path: PathBuf,
    pub max_connections: usize,
    pub sync_policy: SyncPolicy,
    pub max_bulk_len: usize,
    pub max_array_len: usize,
    pub max_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = DecodeLimits::default();
        Self {
            bind_addr: "127.0.0.1:6379".to_string(),
            aof_path: PathBuf::from("database.aof"),
            max_connections: 1000,
            sync_policy: SyncPolicy::default(),
            max_bulk_len: limits.max_bulk_len,
            max_array_len: limits.max_array_len,
            max_depth: limits.max_depth,
        }
    }
}

impl ServerConfig {
    /// Load a config from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 || self.max_connections > Semaphore::MAX_PERMITS {
            return Err(RespVaultError::Server(format!(
                "max_connections must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                self.max_connections
            )));
        }
        if self.max_depth == 0 {
            return Err(RespVaultError::Server(
                "max_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_bulk_len: self.max_bulk_len,
            max_array_len: self.max_array_len,
            max_depth: self.max_depth,
        }
    }
}
