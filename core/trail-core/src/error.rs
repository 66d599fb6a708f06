//! Error types for trail-core operations.

use std::path::PathBuf;

/// All errors that can occur in trail-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TrailError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Event violates phase invariant: {0}")]
    InvalidEvent(String),

    // ─────────────────────────────────────────────────────────────────────
    // Compaction Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Backup failed for {path}: {source}")]
    BackupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Another compaction holds {0}")]
    CompactionBusy(PathBuf),

    // ─────────────────────────────────────────────────────────────────────
    // Transport Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Local agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("Local agent rejected batch: {code}: {message}")]
    AgentRejected { code: String, message: String },

    #[error("Remote API error: {0}")]
    Remote(String),

    #[error("No transport available: agent not ready and no remote endpoint configured")]
    NoTransport,
}

impl TrailError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        TrailError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        TrailError::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using TrailError.
pub type Result<T> = std::result::Result<T, TrailError>;

impl From<TrailError> for String {
    fn from(err: TrailError) -> String {
        err.to_string()
    }
}
