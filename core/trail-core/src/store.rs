//! File-backed event logs and the sync cursor.
//!
//! The store is the only component that touches the on-disk files. Shell
//! sessions append concurrently; appends rely on `O_APPEND` and a single
//! `write` per line, with no cross-process lock. Readers are tolerant:
//!
//! - Missing files read as empty logs / no cursor
//! - Invalid UTF-8 is replaced rather than failing the whole read
//! - Undecodable lines (torn writes, hand edits) are logged and skipped
//!
//! # Rewrites
//!
//! Compaction replaces whole files. Every rewrite stages the new content in
//! a temp file first, then renames the live file to `<name>.bak`, then moves
//! the temp file into place. If the backup rename fails nothing is written.
//! If the final move fails the `.bak` file is the recovery path; there is no
//! automatic rollback. An appender racing the rename can lose its line, which
//! is why compaction runs rarely and under [`CompactionLock`].

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::error::{Result, TrailError};
use crate::event::{unix_nanos, Event, Phase};
use crate::storage::StorageConfig;

/// Which append-only log an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Pre,
    Post,
}

impl LogKind {
    fn phase(self) -> Phase {
        match self {
            LogKind::Pre => Phase::Pre,
            LogKind::Post => Phase::Post,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogKind::Pre => "pre",
            LogKind::Post => "post",
        }
    }
}

/// Result of reading a log: decoded events in file order plus line counts.
#[derive(Debug, Default)]
pub struct LogContents {
    pub events: Vec<Event>,
    /// Non-empty lines seen, decodable or not.
    pub line_count: usize,
    /// Lines that failed to decode and were skipped.
    pub skipped: usize,
}

pub struct EventStore {
    storage: StorageConfig,
}

impl EventStore {
    pub fn new(storage: StorageConfig) -> Self {
        EventStore { storage }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn log_path(&self, log: LogKind) -> PathBuf {
        match log {
            LogKind::Pre => self.storage.pre_log_file(),
            LogKind::Post => self.storage.post_log_file(),
        }
    }

    pub fn append(&self, log: LogKind, event: &Event) -> Result<()> {
        if event.phase != log.phase() {
            return Err(TrailError::InvalidEvent(format!(
                "{:?} event cannot be appended to the {} log",
                event.phase,
                log.label()
            )));
        }

        let mut line = event.encode_line()?;
        line.push('\n');
        self.append_line(&self.log_path(log), &line)
    }

    pub fn read_all(&self, log: LogKind) -> Result<LogContents> {
        let path = self.log_path(log);
        let Some(content) = read_lossy(&path)? else {
            return Ok(LogContents::default());
        };

        let mut contents = LogContents::default();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            contents.line_count += 1;
            match Event::decode_line(line) {
                Ok(event) => contents.events.push(event),
                Err(err) => {
                    contents.skipped += 1;
                    tracing::warn!(
                        path = %path.display(),
                        line = index + 1,
                        error = %err,
                        "Skipping malformed log line"
                    );
                }
            }
        }

        Ok(contents)
    }

    /// Reads the current cursor: the last parseable record in the cursor file.
    ///
    /// `None` means no sync has ever been committed (fresh install).
    pub fn read_cursor(&self) -> Result<Option<DateTime<Utc>>> {
        let path = self.storage.cursor_file();
        let Some(content) = read_lossy(&path)? else {
            return Ok(None);
        };

        for line in content.lines().rev() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match trimmed.parse::<i64>() {
                Ok(nanos) => return Ok(Some(DateTime::from_timestamp_nanos(nanos))),
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        record = %trimmed,
                        error = %err,
                        "Skipping malformed cursor record"
                    );
                }
            }
        }

        Ok(None)
    }

    /// Appends a cursor record (sync commit).
    pub fn append_cursor(&self, cursor: DateTime<Utc>) -> Result<()> {
        let line = format!("{}\n", unix_nanos(&cursor));
        self.append_line(&self.storage.cursor_file(), &line)
    }

    /// Replaces the cursor file with a single record (compaction).
    pub fn overwrite_cursor(&self, cursor: DateTime<Utc>) -> Result<()> {
        let content = format!("{}\n", unix_nanos(&cursor));
        self.rewrite_file(&self.storage.cursor_file(), &content)
    }

    /// Replaces the cursor file with a single record of `observed` or the
    /// value currently on disk, whichever is newer. Returns the value kept.
    pub fn compact_cursor(&self, observed: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let cursor = match self.read_cursor()? {
            Some(current) => current.max(observed),
            None => observed,
        };
        self.overwrite_cursor(cursor)?;
        Ok(cursor)
    }

    /// Replaces a log with `events`, in the order given.
    pub fn rewrite(&self, log: LogKind, events: &[Event]) -> Result<()> {
        let mut content = String::new();
        for event in events {
            content.push_str(&event.encode_line()?);
            content.push('\n');
        }
        self.rewrite_file(&self.log_path(log), &content)
    }

    /// Takes the exclusive compaction lock, failing fast if another process holds it.
    pub fn lock_compaction(&self) -> Result<CompactionLock> {
        self.storage.ensure_dirs()?;
        let path = self.storage.compact_lock_file();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| TrailError::io(format!("open {}", path.display()), err))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(CompactionLock { _file: file }),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                Err(TrailError::CompactionBusy(path))
            }
            Err(err) => Err(TrailError::io(format!("lock {}", path.display()), err)),
        }
    }

    /// Appends `line` with one write. If the file ends in a torn, unterminated
    /// fragment, the write starts with a newline so the fragment stays a
    /// separate (skipped) line instead of swallowing this one.
    fn append_line(&self, path: &Path, line: &str) -> Result<()> {
        self.storage.ensure_dirs()?;
        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|err| TrailError::io("open log for append", err))?;

        let mut bytes = Vec::with_capacity(line.len() + 1);
        if ends_with_fragment(&mut file)? {
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(line.as_bytes());
        file.write_all(&bytes)
            .map_err(|err| TrailError::io("append log line", err))
    }

    fn rewrite_file(&self, path: &Path, content: &str) -> Result<()> {
        self.storage.ensure_dirs()?;

        let mut temp_file = NamedTempFile::new_in(self.storage.root())
            .map_err(|err| TrailError::io("create temp file", err))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|err| TrailError::io("write temp file", err))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|err| TrailError::io("sync temp file", err))?;

        if path.exists() {
            let backup = StorageConfig::backup_path(path);
            fs_err::rename(path, &backup).map_err(|source| TrailError::BackupFailed {
                path: path.to_path_buf(),
                source,
            })?;
        }

        temp_file
            .persist(path)
            .map_err(|err| TrailError::io(format!("replace {}", path.display()), err.error))?;
        Ok(())
    }
}

/// Held for the duration of a compaction; released on drop.
pub struct CompactionLock {
    _file: File,
}

fn ends_with_fragment(file: &mut fs_err::File) -> Result<bool> {
    let len = file
        .metadata()
        .map_err(|err| TrailError::io("stat log", err))?
        .len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|err| TrailError::io("read log tail", err))?;
    Ok(last[0] != b'\n')
}

fn read_lossy(path: &Path) -> Result<Option<String>> {
    match fs_err::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(TrailError::io("read log", err)),
    }
}
