//! trail-hook: shell hook CLI for cmdtrail.
//!
//! Called by the shell's preexec/precmd hooks to record commands, and by
//! the user (or cron) to force a sync or compact the logs.
//!
//! ## Subcommands
//!
//! - `pre`: Record a command start
//! - `post`: Record a command finish, then sync if enough are pending
//! - `sync`: Send pending commands now
//! - `compact`: Trim acknowledged history from the logs

mod logging;
mod record;
mod sync;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use record::HookArgs;
use trail_core::{StorageConfig, SyncOptions};

#[derive(Parser)]
#[command(name = "trail-hook")]
#[command(about = "Shell command recorder for cmdtrail")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommandArgs {
    /// Shell name (zsh, bash, fish)
    #[arg(long)]
    shell: String,

    /// Shell session identifier (default: parent process ID)
    #[arg(long)]
    session_id: Option<i64>,

    /// Full command line as typed
    #[arg(long, allow_hyphen_values = true)]
    command: String,
}

impl From<CommandArgs> for HookArgs {
    fn from(args: CommandArgs) -> Self {
        HookArgs {
            shell: args.shell,
            session_id: args.session_id,
            command: args.command,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Record a command start (preexec hook)
    Pre(CommandArgs),

    /// Record a command finish (precmd hook)
    Post {
        #[command(flatten)]
        args: CommandArgs,

        /// Exit status of the command
        #[arg(long, allow_hyphen_values = true)]
        result: i32,
    },

    /// Send pending commands
    Sync {
        /// Ignore the flush threshold
        #[arg(long)]
        force: bool,

        /// Deliver without advancing the cursor
        #[arg(long)]
        dry_run: bool,
    },

    /// Drop synced history from the local logs
    Compact,
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    match cli.command {
        // Recording is non-critical - log errors but exit 0 to not disrupt the shell
        Commands::Pre(args) => {
            if let Err(e) = record::run_pre(args.into()) {
                tracing::warn!(error = %e, "trail-hook pre failed");
            }
            ExitCode::SUCCESS
        }
        Commands::Post { args, result } => {
            if let Err(e) = record::run_post(args.into(), result) {
                tracing::warn!(error = %e, "trail-hook post failed");
            }
            ExitCode::SUCCESS
        }
        Commands::Sync { force, dry_run } => {
            let options = SyncOptions { force, dry_run };
            match storage().and_then(|storage| sync::run_sync(&storage, options)) {
                Ok(report) => {
                    println!("{}", sync::describe_sync(&report));
                    ExitCode::SUCCESS
                }
                Err(e) => fail("sync", &e),
            }
        }
        Commands::Compact => match storage().and_then(|storage| sync::run_compact(&storage)) {
            Ok(report) => {
                println!("{}", sync::describe_compact(&report));
                ExitCode::SUCCESS
            }
            Err(e) => fail("compact", &e),
        },
    }
}

fn storage() -> Result<StorageConfig, String> {
    Ok(StorageConfig::from_home()?)
}

fn fail(command: &str, error: &str) -> ExitCode {
    tracing::error!(error = %error, "trail-hook {} failed", command);
    eprintln!("trail-hook {}: {}", command, error);
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_post_hook_arguments() {
        let cli = Cli::try_parse_from([
            "trail-hook",
            "post",
            "--shell",
            "bash",
            "--command",
            "make -j8",
            "--result",
            "2",
        ])
        .unwrap();

        match cli.command {
            Commands::Post { args, result } => {
                assert_eq!(result, 2);
                assert_eq!(args.command, "make -j8");
                assert_eq!(args.shell, "bash");
                assert!(args.session_id.is_none());
            }
            _ => panic!("expected post"),
        }
    }

    #[test]
    fn parses_sync_flags() {
        let cli = Cli::try_parse_from(["trail-hook", "sync", "--force", "--dry-run"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sync {
                force: true,
                dry_run: true
            }
        ));
    }
}
