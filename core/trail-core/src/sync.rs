//! Checkpointed sync of completed commands.
//!
//! A sync reads every post event newer than the cursor, pairs it with its pre
//! event, filters and masks the text, and hands one batch to the transport.
//! The cursor only advances after the transport accepts the batch, so a
//! failure anywhere before that resends the same window next time
//! (at-least-once).

use chrono::{DateTime, Utc};

use crate::config::ConfigProvider;
use crate::correlate::{Correlation, PreIndex};
use crate::error::Result;
use crate::event::{unix_nanos, Event};
use crate::filter::CommandFilter;
use crate::store::{EventStore, LogKind};
use crate::transport::{BatchMetadata, BatchPayload, BatchRecord, Channel, TransportSelector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Send even when fewer than `flush_count` records are pending.
    pub force: bool,
    /// Deliver but leave the cursor where it is.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing transmittable past the cursor.
    Empty,
    BelowThreshold {
        pending: usize,
        threshold: usize,
    },
    Delivered {
        records: usize,
        cursor: DateTime<Utc>,
        channel: Channel,
        dry_run: bool,
    },
}

/// Entries past the cursor that did not become records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipCounts {
    pub orphans: usize,
    pub excluded: usize,
    pub malformed_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub skipped: SkipCounts,
}

/// OS identity stamped on every batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    pub os: String,
    pub os_version: String,
}

impl HostInfo {
    pub fn detect() -> Self {
        HostInfo {
            os: sysinfo::System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            os_version: sysinfo::System::os_version().unwrap_or_default(),
        }
    }
}

/// Records selected for one batch, before transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    pub records: Vec<BatchRecord>,
    pub metadata: Option<BatchMetadata>,
    /// Newest post past the cursor, including dropped ones.
    pub candidate_cursor: Option<DateTime<Utc>>,
    pub skipped: SkipCounts,
}

/// Selects and shapes the records to send for `posts` given `cursor`.
///
/// Orphans and excluded entries still push the candidate cursor forward, so
/// they are not reconsidered once a batch containing later entries lands.
pub fn plan_batch(
    cursor: Option<DateTime<Utc>>,
    posts: &[Event],
    pres: &PreIndex,
    filter: &CommandFilter,
    host: &HostInfo,
) -> PlannedBatch {
    let mut plan = PlannedBatch {
        records: Vec::new(),
        metadata: None,
        candidate_cursor: None,
        skipped: SkipCounts::default(),
    };

    for post in posts {
        if cursor.is_some_and(|cursor| post.occurred_at <= cursor) {
            continue;
        }
        plan.candidate_cursor = plan.candidate_cursor.max(Some(post.occurred_at));

        let start = match pres.correlate(post) {
            Correlation::Orphan => {
                tracing::debug!(session_id = post.session_id, "Dropping orphan post event");
                plan.skipped.orphans += 1;
                continue;
            }
            Correlation::NoPreceding => None,
            Correlation::Matched(pre) => Some(pre.occurred_at),
        };

        if plan.metadata.is_none() {
            plan.metadata = Some(BatchMetadata {
                hostname: post.hostname.clone(),
                username: post.username.clone(),
                os: host.os.clone(),
                os_version: host.os_version.clone(),
                shell: post.shell.clone(),
            });
        }

        if filter.is_excluded(&post.text) {
            plan.skipped.excluded += 1;
            continue;
        }

        let (start_time, start_time_nano) = start
            .map(|at| (at.timestamp(), unix_nanos(&at)))
            .unwrap_or((0, 0));
        plan.records.push(BatchRecord {
            session_id: post.session_id,
            command: filter.outbound_text(&post.text),
            start_time,
            start_time_nano,
            end_time: post.occurred_at.timestamp(),
            end_time_nano: unix_nanos(&post.occurred_at),
            result: post.result.unwrap_or_default(),
        });
    }

    plan
}

pub struct SyncEngine<'a> {
    store: &'a EventStore,
    config: &'a dyn ConfigProvider,
    transport: &'a TransportSelector,
    host: HostInfo,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a EventStore,
        config: &'a dyn ConfigProvider,
        transport: &'a TransportSelector,
    ) -> Self {
        SyncEngine {
            store,
            config,
            transport,
            host: HostInfo::detect(),
        }
    }

    pub fn with_host(mut self, host: HostInfo) -> Self {
        self.host = host;
        self
    }

    pub fn sync(&self, options: SyncOptions) -> Result<SyncReport> {
        let config = self.config.read()?;
        let cursor = self.store.read_cursor()?;
        let posts = self.store.read_all(LogKind::Post)?;
        let pres = self.store.read_all(LogKind::Pre)?;

        let index = PreIndex::build(pres.events);
        let filter = CommandFilter::new(&config.exclude_patterns, config.data_masking);
        let plan = plan_batch(cursor, &posts.events, &index, &filter, &self.host);

        let mut skipped = plan.skipped;
        skipped.malformed_lines = posts.skipped + pres.skipped;
        let report = |outcome| SyncReport { outcome, skipped };

        let candidate = match plan.candidate_cursor {
            Some(candidate) if !plan.records.is_empty() => candidate,
            _ => return Ok(report(SyncOutcome::Empty)),
        };

        let pending = plan.records.len();
        if !options.force && cursor.is_some() && pending < config.flush_count {
            tracing::debug!(pending, threshold = config.flush_count, "Below flush threshold");
            return Ok(report(SyncOutcome::BelowThreshold {
                pending,
                threshold: config.flush_count,
            }));
        }

        let payload = BatchPayload {
            records: plan.records,
            metadata: plan.metadata.unwrap_or_default(),
            cursor: unix_nanos(&candidate),
        };
        let channel = self.transport.deliver(&payload)?;

        if options.dry_run {
            tracing::info!(records = pending, ?channel, "Dry run delivered; cursor unchanged");
        } else {
            self.commit_cursor(candidate)?;
            tracing::info!(records = pending, ?channel, cursor = %candidate, "Synced batch");
        }

        Ok(report(SyncOutcome::Delivered {
            records: pending,
            cursor: candidate,
            channel,
            dry_run: options.dry_run,
        }))
    }

    fn commit_cursor(&self, candidate: DateTime<Utc>) -> Result<()> {
        if let Some(current) = self.store.read_cursor()? {
            if current >= candidate {
                tracing::debug!(%current, %candidate, "Newer cursor already committed");
                return Ok(());
            }
        }
        self.store.append_cursor(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::event::test_support::{at_secs, post, pre};
    use crate::storage::StorageConfig;
    use crate::transport::test_support::{selector, RecordingTransport};
    use tempfile::TempDir;

    fn host() -> HostInfo {
        HostInfo {
            os: "Linux".to_string(),
            os_version: "6.1".to_string(),
        }
    }

    fn store(temp: &TempDir) -> EventStore {
        EventStore::new(StorageConfig::with_root(temp.path().to_path_buf()))
    }

    fn record(store: &EventStore, events: &[Event]) {
        for event in events {
            let log = match event.result {
                Some(_) => LogKind::Post,
                None => LogKind::Pre,
            };
            store.append(log, event).unwrap();
        }
    }

    fn run(
        store: &EventStore,
        config: &SyncConfig,
        agent: &RecordingTransport,
        options: SyncOptions,
    ) -> Result<SyncReport> {
        let transport = selector(true, agent, None);
        SyncEngine::new(store, config, &transport)
            .with_host(host())
            .sync(options)
    }

    #[test]
    fn first_sync_sends_matched_command() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "npm test", 100), post(1, "npm test", 150, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);

        let report = run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();

        assert_eq!(
            report.outcome,
            SyncOutcome::Delivered {
                records: 1,
                cursor: at_secs(150),
                channel: Channel::LocalAgent,
                dry_run: false,
            }
        );
        let sent = agent.sent.borrow();
        let record = &sent[0].records[0];
        assert_eq!(record.command, "npm test");
        assert_eq!(record.start_time, 100);
        assert_eq!(record.end_time, 150);
        assert_eq!(record.result, 0);
        assert_eq!(sent[0].cursor, 150_000_000_000);
        assert_eq!(sent[0].metadata.os, "Linux");
        assert_eq!(sent[0].metadata.shell, "zsh");
        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(150)));
    }

    #[test]
    fn orphan_is_dropped_but_advances_cursor() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(
            &store,
            &[
                post(7, "server start", 200, 1),
                pre(1, "ls", 210),
                post(1, "ls", 220, 0),
            ],
        );
        let agent = RecordingTransport::new(Channel::LocalAgent);

        let report = run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();

        assert_eq!(report.skipped.orphans, 1);
        let sent = agent.sent.borrow();
        assert_eq!(sent[0].records.len(), 1);
        assert_eq!(sent[0].records[0].command, "ls");
        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(220)));
    }

    #[test]
    fn only_orphans_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[post(7, "server start", 200, 1)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);

        let report = run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();

        assert_eq!(report.outcome, SyncOutcome::Empty);
        assert!(agent.sent.borrow().is_empty());
        assert_eq!(store.read_cursor().unwrap(), None);
    }

    #[test]
    fn threshold_gates_once_cursor_exists() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        store.append_cursor(at_secs(50)).unwrap();
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let config = SyncConfig {
            flush_count: 3,
            ..SyncConfig::default()
        };

        let report = run(&store, &config, &agent, SyncOptions::default()).unwrap();
        assert_eq!(
            report.outcome,
            SyncOutcome::BelowThreshold {
                pending: 1,
                threshold: 3
            }
        );
        assert!(agent.sent.borrow().is_empty());
        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(50)));

        let forced = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        let report = run(&store, &config, &agent, forced).unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Delivered { records: 1, .. }));
        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(101)));
    }

    #[test]
    fn first_run_bypasses_threshold() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let config = SyncConfig {
            flush_count: 50,
            ..SyncConfig::default()
        };

        let report = run(&store, &config, &agent, SyncOptions::default()).unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Delivered { .. }));
    }

    #[test]
    fn excluded_commands_never_leave() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(
            &store,
            &[
                pre(1, "ssh prod", 100),
                post(1, "ssh prod", 110, 0),
                pre(1, "ls", 120),
                post(1, "ls", 121, 0),
            ],
        );
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let config = SyncConfig {
            exclude_patterns: vec!["^ssh ".to_string()],
            ..SyncConfig::default()
        };

        let report = run(&store, &config, &agent, SyncOptions::default()).unwrap();

        assert_eq!(report.skipped.excluded, 1);
        let sent = agent.sent.borrow();
        let commands: Vec<&str> = sent[0].records.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, vec!["ls"]);
    }

    #[test]
    fn masks_text_and_excludes_on_raw_text() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let command = "curl -H 'Authorization: Bearer abcd1234'";
        record(&store, &[pre(1, command, 100), post(1, command, 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);

        run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();
        assert_eq!(
            agent.sent.borrow()[0].records[0].command,
            "curl -H 'Authorization: Bearer ******'"
        );

        let temp = TempDir::new().unwrap();
        let store = self::store(&temp);
        record(&store, &[pre(1, command, 100), post(1, command, 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let config = SyncConfig {
            exclude_patterns: vec!["abcd1234".to_string()],
            ..SyncConfig::default()
        };
        let report = run(&store, &config, &agent, SyncOptions::default()).unwrap();
        assert_eq!(report.outcome, SyncOutcome::Empty);
        assert_eq!(report.skipped.excluded, 1);
    }

    #[test]
    fn post_before_its_pre_has_zero_start() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[post(1, "make", 100, 2), pre(1, "make", 105)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);

        run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();

        let sent = agent.sent.borrow();
        let record = &sent[0].records[0];
        assert_eq!((record.start_time, record.start_time_nano), (0, 0));
        assert_eq!(record.result, 2);
    }

    #[test]
    fn transport_failure_leaves_cursor() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::failing(Channel::LocalAgent);

        assert!(run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).is_err());
        assert_eq!(store.read_cursor().unwrap(), None);
    }

    #[test]
    fn dry_run_leaves_cursor() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let options = SyncOptions {
            dry_run: true,
            ..SyncOptions::default()
        };

        let report = run(&store, &SyncConfig::default(), &agent, options).unwrap();

        assert!(matches!(report.outcome, SyncOutcome::Delivered { dry_run: true, .. }));
        assert_eq!(agent.sent.borrow().len(), 1);
        assert_eq!(store.read_cursor().unwrap(), None);
    }

    #[test]
    fn synced_window_is_not_resent() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);

        run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();
        let report = run(&store, &SyncConfig::default(), &agent, SyncOptions::default()).unwrap();

        assert_eq!(report.outcome, SyncOutcome::Empty);
        assert_eq!(agent.sent.borrow().len(), 1);
    }

    #[test]
    fn commit_never_lowers_cursor() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        record(&store, &[pre(1, "ls", 100), post(1, "ls", 101, 0)]);
        let agent = RecordingTransport::new(Channel::LocalAgent);
        let transport = selector(true, &agent, None);
        let config = SyncConfig::default();
        let engine = SyncEngine::new(&store, &config, &transport).with_host(host());

        store.append_cursor(at_secs(500)).unwrap();
        engine.commit_cursor(at_secs(101)).unwrap();

        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(500)));
    }

    #[test]
    fn plan_counts_candidate_cursor_over_dropped_entries() {
        let index = PreIndex::build(vec![pre(1, "ls", 100)]);
        let posts = vec![post(1, "ls", 101, 0), post(9, "ghost", 300, 0)];
        let filter = CommandFilter::new(&[], true);

        let plan = plan_batch(Some(at_secs(50)), &posts, &index, &filter, &host());

        assert_eq!(plan.records.len(), 1);
        assert_eq!(plan.candidate_cursor, Some(at_secs(300)));
        assert_eq!(plan.skipped.orphans, 1);
    }
}
