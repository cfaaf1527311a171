//! File naming, rotation and retention for one stream
//!
//! Files are named `<stream>_<YYYYMMDD-HHMMSS-mmm>[-<seq>].log`. The
//! sequence suffix only appears when two files of a stream would
//! otherwise share a millisecond. Creation order is the order of
//! `(created, seq)`.

use crate::config::FileLoggerConfig;
use crate::error::{Error, Result};
use crate::writer::FileWriter;
use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use glob::{Pattern, glob};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const EXTENSION: &str = ".log";
const DATE_FORMAT: &str = "%Y%m%d-%H%M%S";
const DATE_LEN: usize = 15;

/// Parsed form of a log file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogFileName {
    /// Stream the file belongs to
    pub stream: String,
    /// Creation time, at millisecond precision
    pub created: DateTime<Utc>,
    /// Collision suffix; zero when absent
    pub seq: u32,
}

impl LogFileName {
    /// Name for a file of `stream` created at `created`
    #[must_use]
    pub fn new(stream: impl Into<String>, created: DateTime<Utc>, seq: u32) -> Self {
        Self {
            stream: stream.into(),
            created: truncate_to_millis(created),
            seq,
        }
    }

    /// Parse a bare file name (no directory). Returns `None` for names
    /// that do not follow the scheme.
    #[must_use]
    pub fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(EXTENSION)?;
        let (stream, stamp) = stem.rsplit_once('_')?;
        if stream.is_empty() {
            return None;
        }

        let date = stamp.get(..DATE_LEN)?;
        let naive = NaiveDateTime::parse_from_str(date, DATE_FORMAT).ok()?;

        let rest = stamp.get(DATE_LEN..)?.strip_prefix('-')?;
        let (millis, seq) = match rest.split_once('-') {
            Some((millis, seq)) => (millis, parse_digits(seq)?),
            None => (rest, 0),
        };
        if millis.len() != 3 {
            return None;
        }
        let millis = parse_digits(millis)?;
        let created = naive
            .with_nanosecond(millis * 1_000_000)?
            .and_utc();

        Some(Self {
            stream: stream.to_string(),
            created,
            seq,
        })
    }

    /// Sort key giving creation order
    #[inline]
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, u32) {
        (self.created, self.seq)
    }
}

impl fmt::Display for LogFileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}-{:03}",
            self.stream,
            self.created.format(DATE_FORMAT),
            self.created.timestamp_subsec_millis()
        )?;
        if self.seq > 0 {
            write!(f, "-{}", self.seq)?;
        }
        f.write_str(EXTENSION)
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    let millis = at.timestamp_subsec_millis();
    at.with_nanosecond(millis * 1_000_000).unwrap_or(at)
}

/// A stream's file found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// Full path
    pub path: PathBuf,
    /// Parsed name
    pub name: LogFileName,
}

/// Result of one rotation
#[derive(Debug)]
pub struct Rotation {
    /// The closed file
    pub previous: PathBuf,
    /// Files removed and failures hit while enforcing retention
    pub retention: Retention,
}

/// Outcome of a retention pass
#[derive(Debug, Default)]
pub struct Retention {
    /// Files deleted
    pub removed: Vec<PathBuf>,
    /// Files that should have been deleted but could not be
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Decides where a stream's next file goes and how many are kept
#[derive(Debug, Clone)]
pub struct RotationPolicy {
    dir: PathBuf,
    stream: String,
    file_size_limit: u64,
    max_files: usize,
}

impl RotationPolicy {
    /// Policy for `stream`'s files directly under `dir`
    #[must_use]
    pub fn new(
        dir: impl Into<PathBuf>,
        stream: impl Into<String>,
        file_size_limit: u64,
        max_files: usize,
    ) -> Self {
        Self {
            dir: dir.into(),
            stream: stream.into(),
            file_size_limit,
            max_files: max_files.max(1),
        }
    }

    /// Policy using the limits from `config`
    #[must_use]
    pub fn from_config(config: &FileLoggerConfig, stream: impl Into<String>) -> Self {
        Self::new(
            config.root_dir.clone(),
            stream,
            config.file_size_limit,
            config.max_files,
        )
    }

    /// Stream this policy names files for
    #[inline]
    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Directory holding the files
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Size at which a file is full
    #[inline]
    #[must_use]
    pub const fn file_size_limit(&self) -> u64 {
        self.file_size_limit
    }

    /// Every file of this stream, oldest first
    pub fn list_files(&self) -> Result<Vec<LogFile>> {
        let dir = self.dir.to_str().ok_or_else(|| {
            Error::UnknownError(format!(
                "log directory is not valid UTF-8: {}",
                self.dir.display()
            ))
        })?;
        let pattern = format!(
            "{}/{}_*{EXTENSION}",
            Pattern::escape(dir),
            Pattern::escape(&self.stream)
        );

        let paths = glob(&pattern).map_err(|e| Error::UnknownError(e.to_string()))?;

        let mut files = Vec::new();
        for entry in paths {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable entry while listing {}: {}", dir, e);
                    continue;
                }
            };
            let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(LogFileName::parse)
            else {
                continue;
            };
            // `a_*` also matches files of stream `a_b`
            if name.stream != self.stream {
                continue;
            }
            files.push(LogFile { path, name });
        }

        files.sort_by_key(|f| f.name.order_key());
        Ok(files)
    }

    /// Path for a new file created at `now`.
    ///
    /// The name always sorts after every existing file of the stream, and
    /// never names a file that already exists.
    pub fn next_path(&self, now: DateTime<Utc>) -> Result<PathBuf> {
        let mut name = LogFileName::new(self.stream.clone(), now, 0);

        if let Some(newest) = self.list_files()?.pop() {
            if newest.name.created >= name.created {
                name.created = newest.name.created;
                name.seq = newest.name.seq + 1;
            }
        }

        loop {
            let path = self.dir.join(name.to_string());
            if fs::symlink_metadata(&path).is_err() {
                return Ok(path);
            }
            name.seq += 1;
        }
    }

    /// Open a freshly named file
    pub fn open_next(&self) -> Result<FileWriter> {
        let path = self.next_path(Utc::now())?;
        FileWriter::open(path, self.file_size_limit)
    }

    /// Replace a full writer with a new one and apply retention.
    ///
    /// The new file is opened before the old one is closed, so a failure
    /// to open leaves the caller with its current writer.
    pub fn rotate(&self, current: &mut FileWriter) -> Result<Rotation> {
        let next = self.open_next()?;
        let previous = std::mem::replace(current, next);
        let previous_path = previous.path().to_path_buf();

        if let Err(e) = previous.close() {
            warn!("Failed to flush {} on rotation: {}", previous_path.display(), e);
        }

        debug!(
            "Rotated log file for stream {}: {} -> {}",
            self.stream,
            previous_path.display(),
            current.path().display()
        );

        let retention = self.enforce_retention(current.path());
        Ok(Rotation {
            previous: previous_path,
            retention,
        })
    }

    /// Delete the oldest files beyond the retention limit, never touching
    /// `active`. Failures are collected, not fatal.
    pub fn enforce_retention(&self, active: &Path) -> Retention {
        let mut retention = Retention::default();

        let files = match self.list_files() {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to list files of stream {}: {}", self.stream, e);
                return retention;
            }
        };

        if files.len() <= self.max_files {
            return retention;
        }

        let excess = files.len() - self.max_files;
        for file in files.into_iter().take(excess) {
            if file.path == active {
                continue;
            }
            match fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Removed old log file {}", file.path.display());
                    retention.removed.push(file.path);
                }
                Err(e) => {
                    warn!("Failed to remove old log file {}: {}", file.path.display(), e);
                    retention.failed.push((file.path, e));
                }
            }
        }

        retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(millis: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
            + chrono::Duration::milliseconds(i64::from(millis))
    }

    #[test]
    fn test_name_format() {
        let name = LogFileName::new("app", at(42), 0);
        assert_eq!(name.to_string(), "app_20240309-140507-042.log");

        let name = LogFileName::new("app", at(42), 3);
        assert_eq!(name.to_string(), "app_20240309-140507-042-3.log");
    }

    #[test]
    fn test_name_parse() {
        let name = LogFileName::parse("my_app_20240309-140507-042-3.log").unwrap();
        assert_eq!(name.stream, "my_app");
        assert_eq!(name.created, at(42));
        assert_eq!(name.seq, 3);

        let name = LogFileName::parse("app_20240309-140507-999.log").unwrap();
        assert_eq!(name, LogFileName::new("app", at(999), 0));

        assert!(LogFileName::parse("app.log").is_none());
        assert!(LogFileName::parse("app_20240309-140507.log").is_none());
        assert!(LogFileName::parse("app_20240309-140507-42.log").is_none());
        assert!(LogFileName::parse("app_20241309-140507-042.log").is_none());
        assert!(LogFileName::parse("app_20240309-140507-042-x.log").is_none());
        assert!(LogFileName::parse("_20240309-140507-042.log").is_none());
        assert!(LogFileName::parse("app_20240309-140507-042.txt").is_none());
    }

    #[test]
    fn test_collision_suffix() {
        let temp_dir = TempDir::new().unwrap();
        let policy = RotationPolicy::new(temp_dir.path(), "app", 1024, 10);

        let first = policy.next_path(at(5)).unwrap();
        fs::write(&first, b"").unwrap();
        let second = policy.next_path(at(5)).unwrap();
        fs::write(&second, b"").unwrap();
        let third = policy.next_path(at(5)).unwrap();

        assert!(first.ends_with("app_20240309-140507-005.log"));
        assert!(second.ends_with("app_20240309-140507-005-1.log"));
        assert!(third.ends_with("app_20240309-140507-005-2.log"));
    }

    #[test]
    fn test_next_name_sorts_last_when_clock_goes_back() {
        let temp_dir = TempDir::new().unwrap();
        let policy = RotationPolicy::new(temp_dir.path(), "app", 1024, 10);

        fs::write(policy.next_path(at(500)).unwrap(), b"").unwrap();
        fs::write(policy.next_path(at(100)).unwrap(), b"").unwrap();

        let files = policy.list_files().unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].name.created, at(500));
        assert_eq!(files[1].name.seq, 1);
    }

    #[test]
    fn test_list_files_filters_other_streams() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for name in [
            "app_20240309-140507-002.log",
            "app_20240309-140507-001.log",
            "app_b_20240309-140507-000.log",
            "other_20240309-140507-000.log",
            "app_garbage.log",
            "notes.txt",
        ] {
            fs::write(dir.join(name), b"").unwrap();
        }

        let policy = RotationPolicy::new(dir, "app", 1024, 10);
        let names: Vec<_> = policy
            .list_files()
            .unwrap()
            .into_iter()
            .map(|f| f.name.to_string())
            .collect();
        assert_eq!(
            names,
            ["app_20240309-140507-001.log", "app_20240309-140507-002.log"]
        );
    }

    #[test]
    fn test_rotate_starts_empty_file() {
        let temp_dir = TempDir::new().unwrap();
        let policy = RotationPolicy::new(temp_dir.path(), "app", 8, 10);

        let mut writer = policy.open_next().unwrap();
        writer.append(b"12345678\n").unwrap();
        assert!(writer.is_full());

        let rotation = policy.rotate(&mut writer).unwrap();
        assert_ne!(rotation.previous, writer.path());
        assert_eq!(writer.bytes_written(), 0);
        assert_eq!(fs::read(&rotation.previous).unwrap(), b"12345678\n");
        assert!(rotation.retention.removed.is_empty());
    }

    #[test]
    fn test_retention_keeps_newest() {
        let temp_dir = TempDir::new().unwrap();
        let policy = RotationPolicy::new(temp_dir.path(), "app", 1, 3);

        let mut writer = policy.open_next().unwrap();
        let mut created = vec![writer.path().to_path_buf()];
        for _ in 0..5 {
            writer.append(b"x\n").unwrap();
            policy.rotate(&mut writer).unwrap();
            created.push(writer.path().to_path_buf());
        }

        let remaining: Vec<_> = policy
            .list_files()
            .unwrap()
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(remaining, created[created.len() - 3..]);
    }
}
