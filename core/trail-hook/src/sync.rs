//! `sync` and `compact` subcommands.

use trail_core::{
    CompactReport, Compactor, ConfigProvider, EventStore, FileConfigProvider, StorageConfig,
    SyncEngine, SyncOptions, SyncOutcome, SyncReport, TransportSelector,
};

pub fn run_sync(storage: &StorageConfig, options: SyncOptions) -> Result<SyncReport, String> {
    let config = FileConfigProvider::for_storage(storage);
    let transport = TransportSelector::from_config(&config.read()?, storage);
    let store = EventStore::new(storage.clone());

    let report = SyncEngine::new(&store, &config, &transport).sync(options)?;
    if report.skipped.orphans > 0 || report.skipped.malformed_lines > 0 {
        tracing::info!(
            orphans = report.skipped.orphans,
            excluded = report.skipped.excluded,
            malformed = report.skipped.malformed_lines,
            "Sync skipped entries"
        );
    }
    Ok(report)
}

pub fn run_compact(storage: &StorageConfig) -> Result<CompactReport, String> {
    let store = EventStore::new(storage.clone());
    Ok(Compactor::new(&store).compact()?)
}

pub fn describe_sync(report: &SyncReport) -> String {
    match &report.outcome {
        SyncOutcome::Empty => "Nothing to sync".to_string(),
        SyncOutcome::BelowThreshold { pending, threshold } => format!(
            "{} command(s) pending, waiting for {} (use --force to send now)",
            pending, threshold
        ),
        SyncOutcome::Delivered {
            records,
            channel,
            dry_run,
            ..
        } => {
            let suffix = if *dry_run { " (dry run, cursor unchanged)" } else { "" };
            format!("Sent {} command(s) via {:?}{}", records, channel, suffix)
        }
    }
}

pub fn describe_compact(report: &CompactReport) -> String {
    format!(
        "Compacted: kept {} pre / {} post, dropped {} pre / {} post ({} still running)",
        report.pre_retained,
        report.post_retained,
        report.pre_dropped,
        report.post_dropped,
        report.open_kept
    )
}
