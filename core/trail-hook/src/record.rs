//! `pre` / `post` subcommands, called by the shell's preexec and precmd hooks.
//!
//! ## Usage
//!
//! ```bash
//! trail-hook pre --shell zsh --command "$1"
//! trail-hook post --shell zsh --command "$cmd" --result "$?"
//! ```
//!
//! Both run in the foreground of the prompt, so they only append one line.
//! `post` additionally runs a non-forced sync, which is a no-op until the
//! flush threshold is reached.

use std::env;

use chrono::Utc;
use trail_core::{CommandContext, EventStore, Recorder, StorageConfig, SyncOptions};

use crate::sync;

/// Arguments shared by both phases.
#[derive(Debug, Clone)]
pub struct HookArgs {
    pub shell: String,
    pub session_id: Option<i64>,
    pub command: String,
}

pub fn run_pre(args: HookArgs) -> Result<(), String> {
    let Some(context) = build_context(args, &host_identity()) else {
        return Ok(());
    };

    let store = EventStore::new(StorageConfig::from_home()?);
    Recorder::new(&store).record_pre(context, Utc::now())?;
    Ok(())
}

pub fn run_post(args: HookArgs, result: i32) -> Result<(), String> {
    let Some(context) = build_context(args, &host_identity()) else {
        return Ok(());
    };

    let storage = StorageConfig::from_home()?;
    let store = EventStore::new(storage.clone());
    Recorder::new(&store).record_post(context, Utc::now(), result)?;

    let report = sync::run_sync(&storage, SyncOptions::default())?;
    tracing::debug!(outcome = ?report.outcome, "Post-command sync finished");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HostIdentity {
    hostname: String,
    username: String,
    parent_pid: Option<i64>,
}

fn host_identity() -> HostIdentity {
    HostIdentity {
        hostname: hostname::get()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        username: env::var("USER")
            .or_else(|_| env::var("USERNAME"))
            .unwrap_or_default(),
        parent_pid: get_ppid(),
    }
}

/// `None` for blank command lines (bare Enter at the prompt).
fn build_context(args: HookArgs, host: &HostIdentity) -> Option<CommandContext> {
    if args.command.trim().is_empty() {
        tracing::debug!("Skipping blank command");
        return None;
    }

    Some(CommandContext {
        shell: args.shell,
        session_id: args.session_id.or(host.parent_pid).unwrap_or_default(),
        text: args.command,
        hostname: host.hostname.clone(),
        username: host.username.clone(),
    })
}

fn get_ppid() -> Option<i64> {
    #[cfg(unix)]
    {
        // SAFETY: getppid() cannot fail; it returns 1 if the parent already exited.
        #[allow(unsafe_code)]
        Some(i64::from(unsafe { libc::getppid() }))
    }
    #[cfg(not(unix))]
    {
        None
    }
}
