//! Sync configuration and the provider seam used to inject it.
//!
//! The sync engine and compactor never read ambient state; callers hand
//! them a [`ConfigProvider`]. Production uses [`FileConfigProvider`] over
//! `~/.cmdtrail/config.toml`, tests pass a [`SyncConfig`] directly.
//!
//! ```toml
//! flush_count = 10
//! exclude_patterns = ["^ssh ", "vault"]
//! data_masking = true
//! remote_endpoint = "https://api.example.com"
//! auth_token = "..."
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};
use crate::storage::StorageConfig;

const DEFAULT_FLUSH_COUNT: usize = 10;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 200;
const DEFAULT_AGENT_SEND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minimum batch size before a non-forced sync transmits.
    pub flush_count: usize,
    /// Regexes; matching commands are never transmitted.
    pub exclude_patterns: Vec<String>,
    /// Mask credentials in transmitted command text.
    pub data_masking: bool,
    /// Agent socket override (default: `<data root>/agent.sock`).
    pub agent_socket: Option<PathBuf>,
    /// Base URL of the analytics API; `None` disables direct delivery.
    pub remote_endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub agent_probe_timeout_ms: u64,
    /// Read/write timeout for handing a batch to the agent.
    pub agent_send_timeout_ms: u64,
    pub remote_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            flush_count: DEFAULT_FLUSH_COUNT,
            exclude_patterns: Vec::new(),
            data_masking: true,
            agent_socket: None,
            remote_endpoint: None,
            auth_token: None,
            agent_probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            agent_send_timeout_ms: DEFAULT_AGENT_SEND_TIMEOUT_MS,
            remote_timeout_ms: DEFAULT_REMOTE_TIMEOUT_MS,
        }
    }
}

impl SyncConfig {
    pub fn agent_socket_path(&self, storage: &StorageConfig) -> PathBuf {
        self.agent_socket
            .clone()
            .unwrap_or_else(|| storage.agent_socket())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_probe_timeout_ms)
    }

    pub fn agent_send_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_send_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }
}

/// Source of [`SyncConfig`] for one invocation.
pub trait ConfigProvider {
    fn read(&self) -> Result<SyncConfig>;
}

impl ConfigProvider for SyncConfig {
    fn read(&self) -> Result<SyncConfig> {
        Ok(self.clone())
    }
}

/// Reads `config.toml`; a missing file yields defaults.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        FileConfigProvider { path }
    }

    pub fn for_storage(storage: &StorageConfig) -> Self {
        Self::new(storage.config_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigProvider for FileConfigProvider {
    fn read(&self) -> Result<SyncConfig> {
        if !self.path.exists() {
            return Ok(SyncConfig::default());
        }

        let content = fs_err::read_to_string(&self.path)
            .map_err(|err| TrailError::io("read config", err))?;
        toml::from_str::<SyncConfig>(&content).map_err(|err| TrailError::ConfigMalformed {
            path: self.path.clone(),
            details: err.to_string(),
        })
    }
}
