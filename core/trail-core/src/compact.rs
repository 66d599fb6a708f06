//! Log compaction.
//!
//! Drops history that is both acknowledged (at or before the cursor) and
//! closed. A pre event survives while it is still open (no post resolves to
//! it) or while an unsynced post still needs it for its start time. Without
//! a cursor nothing has been acknowledged, so every event survives.
//!
//! Output is sorted by `occurred_at` with a stable sort, so compacting an
//! already-compacted store rewrites identical bytes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::correlate::PreIndex;
use crate::error::Result;
use crate::event::Event;
use crate::store::{EventStore, LogKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactReport {
    pub pre_retained: usize,
    pub pre_dropped: usize,
    pub post_retained: usize,
    pub post_dropped: usize,
    /// Acknowledged pre events kept because no post has closed them.
    pub open_kept: usize,
    /// Lines that could not be decoded and are not carried forward.
    pub malformed_dropped: usize,
}

#[derive(Debug)]
pub struct CompactionPlan {
    pub pres: Vec<Event>,
    pub posts: Vec<Event>,
    pub report: CompactReport,
}

pub fn plan_compaction(
    cursor: Option<DateTime<Utc>>,
    pres: Vec<Event>,
    posts: Vec<Event>,
) -> CompactionPlan {
    let unsynced = |event: &Event| cursor.map_or(true, |cursor| event.occurred_at > cursor);
    let total_pres = pres.len();
    let total_posts = posts.len();

    let index = PreIndex::build(pres);
    let mut closed = HashSet::new();
    let mut needed = HashSet::new();
    let mut retained_posts = Vec::new();
    for post in posts {
        let matched = index.matched_position(&post);
        if let Some(position) = matched {
            closed.insert(position);
        }
        if unsynced(&post) {
            needed.extend(matched);
            retained_posts.push(post);
        }
    }

    let mut report = CompactReport::default();
    let mut retained_pres = Vec::new();
    for (position, pre) in index.into_events().into_iter().enumerate() {
        let open = !closed.contains(&position);
        if unsynced(&pre) || needed.contains(&position) {
            retained_pres.push(pre);
        } else if open {
            report.open_kept += 1;
            retained_pres.push(pre);
        }
    }

    retained_pres.sort_by_key(|event| event.occurred_at);
    retained_posts.sort_by_key(|event| event.occurred_at);

    report.pre_retained = retained_pres.len();
    report.pre_dropped = total_pres - retained_pres.len();
    report.post_retained = retained_posts.len();
    report.post_dropped = total_posts - retained_posts.len();

    CompactionPlan {
        pres: retained_pres,
        posts: retained_posts,
        report,
    }
}

/// Runs compaction against one store.
///
/// Takes no [`ConfigProvider`](crate::config::ConfigProvider): retention is
/// decided entirely by the cursor and the correlator, and no setting may
/// widen what gets dropped. Like [`SyncEngine`](crate::sync::SyncEngine) it
/// reads no ambient state.
pub struct Compactor<'a> {
    store: &'a EventStore,
}

impl<'a> Compactor<'a> {
    pub fn new(store: &'a EventStore) -> Self {
        Compactor { store }
    }

    /// Rewrites both logs and the cursor file under the compaction lock.
    pub fn compact(&self) -> Result<CompactReport> {
        let _lock = self.store.lock_compaction()?;

        let cursor = self.store.read_cursor()?;
        let pres = self.store.read_all(LogKind::Pre)?;
        let posts = self.store.read_all(LogKind::Post)?;
        let malformed = pres.skipped + posts.skipped;

        let plan = plan_compaction(cursor, pres.events, posts.events);
        let report = self.apply(cursor, plan)?;

        let report = CompactReport {
            malformed_dropped: malformed,
            ..report
        };
        tracing::info!(
            pre_retained = report.pre_retained,
            pre_dropped = report.pre_dropped,
            post_retained = report.post_retained,
            post_dropped = report.post_dropped,
            open_kept = report.open_kept,
            "Compacted event logs"
        );
        Ok(report)
    }

    /// Writes a plan built against `cursor`. Syncs do not take the compaction
    /// lock, so the cursor file may have advanced since it was read.
    fn apply(
        &self,
        cursor: Option<DateTime<Utc>>,
        plan: CompactionPlan,
    ) -> Result<CompactReport> {
        self.store.rewrite(LogKind::Pre, &plan.pres)?;
        self.store.rewrite(LogKind::Post, &plan.posts)?;
        if let Some(cursor) = cursor {
            let kept = self.store.compact_cursor(cursor)?;
            if kept > cursor {
                tracing::debug!(%cursor, %kept, "Cursor advanced during compaction");
            }
        }
        Ok(plan.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrailError;
    use crate::event::test_support::{at_secs, post, pre};
    use crate::storage::StorageConfig;
    use tempfile::TempDir;

    fn texts(events: &[Event]) -> Vec<(&str, i64)> {
        events
            .iter()
            .map(|event| (event.text.as_str(), event.occurred_at.timestamp()))
            .collect()
    }

    #[test]
    fn drops_acknowledged_pairs_and_keeps_the_rest() {
        let plan = plan_compaction(
            Some(at_secs(150)),
            vec![pre(1, "npm test", 100), pre(1, "ls", 160)],
            vec![post(1, "npm test", 150, 0), post(1, "ls", 161, 0)],
        );

        assert_eq!(texts(&plan.pres), vec![("ls", 160)]);
        assert_eq!(texts(&plan.posts), vec![("ls", 161)]);
        assert_eq!(plan.report.pre_dropped, 1);
        assert_eq!(plan.report.post_dropped, 1);
    }

    #[test]
    fn keeps_open_pre_events() {
        let plan = plan_compaction(
            Some(at_secs(500)),
            vec![pre(2, "vim notes.md", 100), pre(1, "ls", 110)],
            vec![post(1, "ls", 111, 0)],
        );

        assert_eq!(texts(&plan.pres), vec![("vim notes.md", 100)]);
        assert!(plan.posts.is_empty());
        assert_eq!(plan.report.open_kept, 1);
    }

    #[test]
    fn keeps_pre_needed_by_unsynced_post() {
        let plan = plan_compaction(
            Some(at_secs(150)),
            vec![pre(1, "cargo build", 100)],
            vec![post(1, "cargo build", 300, 0)],
        );

        assert_eq!(texts(&plan.pres), vec![("cargo build", 100)]);
        assert_eq!(texts(&plan.posts), vec![("cargo build", 300)]);
        assert_eq!(plan.report.open_kept, 0);
    }

    #[test]
    fn removes_acknowledged_orphan_posts() {
        let plan = plan_compaction(
            Some(at_secs(500)),
            Vec::new(),
            vec![post(7, "server start", 200, 1)],
        );
        assert!(plan.posts.is_empty());
        assert_eq!(plan.report.post_dropped, 1);
    }

    #[test]
    fn no_cursor_retains_everything_sorted() {
        let plan = plan_compaction(
            None,
            vec![pre(1, "b", 20), pre(1, "a", 10)],
            vec![post(1, "b", 21, 0), post(1, "a", 11, 0)],
        );

        assert_eq!(texts(&plan.pres), vec![("a", 10), ("b", 20)]);
        assert_eq!(texts(&plan.posts), vec![("a", 11), ("b", 21)]);
        assert_eq!(plan.report.pre_dropped + plan.report.post_dropped, 0);
    }

    fn seeded_store(temp: &TempDir) -> EventStore {
        let store = EventStore::new(StorageConfig::with_root(temp.path().to_path_buf()));
        for event in [pre(1, "npm test", 100), pre(2, "vim", 120), pre(1, "ls", 200)] {
            store.append(LogKind::Pre, &event).unwrap();
        }
        for event in [post(1, "npm test", 150, 0), post(1, "ls", 201, 0)] {
            store.append(LogKind::Post, &event).unwrap();
        }
        store.append_cursor(at_secs(120)).unwrap();
        store.append_cursor(at_secs(150)).unwrap();
        store
    }

    #[test]
    fn compaction_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = seeded_store(&temp);
        let storage = store.storage().clone();
        let snapshot = || {
            (
                fs_err::read(storage.pre_log_file()).unwrap(),
                fs_err::read(storage.post_log_file()).unwrap(),
                fs_err::read(storage.cursor_file()).unwrap(),
            )
        };

        Compactor::new(&store).compact().unwrap();
        let first = snapshot();
        let report = Compactor::new(&store).compact().unwrap();
        let second = snapshot();

        assert_eq!(first, second);
        assert_eq!(report.pre_dropped + report.post_dropped, 0);
    }

    #[test]
    fn compaction_rewrites_logs_and_cursor() {
        let temp = TempDir::new().unwrap();
        let store = seeded_store(&temp);

        let report = Compactor::new(&store).compact().unwrap();

        assert_eq!(report.pre_retained, 2);
        assert_eq!(report.post_retained, 1);
        let pres = store.read_all(LogKind::Pre).unwrap().events;
        assert_eq!(texts(&pres), vec![("vim", 120), ("ls", 200)]);
        assert_eq!(
            fs_err::read_to_string(store.storage().cursor_file()).unwrap(),
            "150000000000\n"
        );
        assert!(StorageConfig::backup_path(&store.storage().pre_log_file()).exists());
    }

    #[test]
    fn compaction_without_cursor_leaves_cursor_absent() {
        let temp = TempDir::new().unwrap();
        let store = EventStore::new(StorageConfig::with_root(temp.path().to_path_buf()));
        store.append(LogKind::Pre, &pre(1, "ls", 10)).unwrap();

        let report = Compactor::new(&store).compact().unwrap();

        assert_eq!(report.pre_retained, 1);
        assert!(!store.storage().cursor_file().exists());
    }

    #[test]
    fn cursor_committed_during_compaction_survives() {
        let temp = TempDir::new().unwrap();
        let store = seeded_store(&temp);
        let compactor = Compactor::new(&store);

        let cursor = store.read_cursor().unwrap();
        let plan = plan_compaction(
            cursor,
            store.read_all(LogKind::Pre).unwrap().events,
            store.read_all(LogKind::Post).unwrap().events,
        );
        store.append_cursor(at_secs(201)).unwrap();
        compactor.apply(cursor, plan).unwrap();

        assert_eq!(store.read_cursor().unwrap(), Some(at_secs(201)));
        assert_eq!(
            fs_err::read_to_string(store.storage().cursor_file()).unwrap(),
            "201000000000\n"
        );
    }

    #[test]
    fn concurrent_compaction_is_rejected() {
        let temp = TempDir::new().unwrap();
        let store = seeded_store(&temp);
        let _held = store.lock_compaction().unwrap();

        let err = Compactor::new(&store).compact().unwrap_err();
        assert!(matches!(err, TrailError::CompactionBusy(_)));
    }
}
