//! Storage configuration and path management for cmdtrail.
//!
//! All file paths for cmdtrail data are resolved here so that the store,
//! the config loader and the hook binary agree on one layout, and so tests
//! can inject a temp directory via [`StorageConfig::with_root`].
//!
//! ```text
//! ~/.cmdtrail/
//! ├── pre-events.jsonl     # command start events (append-only)
//! ├── post-events.jsonl    # command completion events (append-only)
//! ├── cursor               # newline-delimited sync watermarks (nanoseconds)
//! ├── compact.lock         # advisory lock held during compaction
//! ├── config.toml          # sync configuration
//! ├── agent.sock           # background agent socket
//! └── logs/                # hook logs
//! ```

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrailError};

const HOME_ENV: &str = "CMDTRAIL_HOME";
const ROOT_DIR: &str = ".cmdtrail";

/// Central configuration for all cmdtrail storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all cmdtrail data (default: ~/.cmdtrail)
    root: PathBuf,
}

impl StorageConfig {
    /// Resolves the data root from `CMDTRAIL_HOME`, falling back to `~/.cmdtrail`.
    pub fn from_home() -> Result<Self> {
        if let Some(root) = env::var_os(HOME_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }
        let home = dirs::home_dir().ok_or(TrailError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(ROOT_DIR)))
    }

    /// Creates a StorageConfig with a custom root directory.
    /// Used for testing with temp directories.
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Event Logs
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn pre_log_file(&self) -> PathBuf {
        self.root.join("pre-events.jsonl")
    }

    pub fn post_log_file(&self) -> PathBuf {
        self.root.join("post-events.jsonl")
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.root.join("cursor")
    }

    pub fn compact_lock_file(&self) -> PathBuf {
        self.root.join("compact.lock")
    }

    /// Path a log is renamed to before a destructive rewrite.
    /// Example: `pre-events.jsonl` -> `pre-events.jsonl.bak`
    pub fn backup_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(".bak");
        PathBuf::from(name)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Configuration & Agent
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Default location of the background agent's socket.
    pub fn agent_socket(&self) -> PathBuf {
        self.root.join("agent.sock")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Ensures the root directory exists.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs_err::create_dir_all(&self.root)
            .map_err(|err| TrailError::io("create data directory", err))
    }
}
