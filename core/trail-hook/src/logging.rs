//! File logging for the hook binary.
//!
//! Hooks run inside the user's prompt, so nothing is ever written to the
//! terminal. Output goes to `<data root>/logs/trail-hook.log.<date>`.

use std::env;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use trail_core::StorageConfig;

const LOG_FILE_PREFIX: &str = "trail-hook.log";

/// Installs the global subscriber. Keep the guard alive until exit so
/// buffered lines are flushed; `None` means logging is disabled.
pub fn init() -> Option<WorkerGuard> {
    let storage = StorageConfig::from_home().ok()?;
    let logs_dir = storage.logs_dir();
    fs_err::create_dir_all(&logs_dir).ok()?;

    let appender = tracing_appender::rolling::daily(&logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn filter() -> EnvFilter {
    if debug_enabled(env::var("CMDTRAIL_DEBUG_LOG").ok().as_deref()) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}
