//! Reconciling on-disk files with in-memory state
//!
//! Every record ends with exactly one terminator byte, so a file whose
//! last byte is the terminator holds only complete records. Anything
//! after the last terminator is the remains of an interrupted write.
//!
//! Nothing here deletes a file it has not positively classified. Partial
//! and unreadable files are left alone and surfaced as issues.

use crate::config::FileLoggerConfig;
use crate::error::{Error, Result};
use crate::rotation::{LogFile, LogFileName, RotationPolicy};
use glob::{Pattern, glob};
use proven_logger::RECORD_TERMINATOR;
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Record boundaries found in a byte run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordScan {
    /// Number of complete records
    pub records: usize,
    /// Length of the prefix made of complete records
    pub complete_len: usize,
    /// Bytes after the last terminator
    pub partial_tail: usize,
}

impl RecordScan {
    /// Whether the bytes end exactly on a record boundary
    #[inline]
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.partial_tail == 0
    }
}

/// Count record boundaries in `bytes`
#[must_use]
pub fn scan_records(bytes: &[u8]) -> RecordScan {
    let records = memchr::memchr_iter(RECORD_TERMINATOR, bytes).count();
    let complete_len = memchr::memrchr(RECORD_TERMINATOR, bytes).map_or(0, |i| i + 1);

    RecordScan {
        records,
        complete_len,
        partial_tail: bytes.len() - complete_len,
    }
}

/// How a file on disk was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Zero bytes
    Empty,
    /// Ends on a record boundary
    Complete {
        /// Records in the file
        records: usize,
    },
    /// Ends inside a record
    Partial {
        /// Complete records before the tail
        records: usize,
        /// Bytes of the unfinished record
        tail_len: usize,
    },
    /// Could not be read
    Unreadable,
}

impl FileStatus {
    /// Whether the file can safely be appended to or merged
    #[inline]
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        matches!(self, Self::Empty | Self::Complete { .. })
    }
}

/// A stream's file with its classification
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// The file
    pub file: LogFile,
    /// Size in bytes when scanned
    pub size: u64,
    /// Classification
    pub status: FileStatus,
}

impl ScannedFile {
    /// Path of the file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file.path
    }
}

/// Classification of every file of one stream
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Files, oldest first
    pub files: Vec<ScannedFile>,
    /// Partial and unreadable files, as errors to surface
    pub issues: Vec<Arc<Error>>,
}

impl ScanReport {
    /// The newest file, if any
    #[must_use]
    pub fn newest(&self) -> Option<&ScannedFile> {
        self.files.last()
    }

    /// Paths classified as unreadable
    pub fn unreadable(&self) -> impl Iterator<Item = &Path> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Unreadable)
            .map(ScannedFile::path)
    }
}

/// Outcome of a merge pass
#[derive(Debug, Default)]
pub struct MergeReport {
    /// Groups of two or more files concatenated into one
    pub merged_groups: usize,
    /// Files deleted after their contents moved
    pub removed_files: usize,
    /// Non-fatal problems hit along the way
    pub issues: Vec<Arc<Error>>,
}

impl MergeReport {
    /// Fold another report into this one
    pub fn absorb(&mut self, other: Self) {
        self.merged_groups += other.merged_groups;
        self.removed_files += other.removed_files;
        self.issues.extend(other.issues);
    }
}

/// Outcome of a clearing pass
#[derive(Debug, Default)]
pub struct ClearReport {
    /// Files deleted
    pub removed: Vec<PathBuf>,
    /// Files left in place because they could not be classified as
    /// redundant, plus deletion failures
    pub issues: Vec<Arc<Error>>,
}

impl ClearReport {
    /// Fold another report into this one
    pub fn absorb(&mut self, other: Self) {
        self.removed.extend(other.removed);
        self.issues.extend(other.issues);
    }
}

/// Scans, classifies, merges and clears log files under one root
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    root: PathBuf,
    file_size_limit: u64,
    max_files: usize,
}

impl RecoveryManager {
    /// Manager for files directly under `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, file_size_limit: u64, max_files: usize) -> Self {
        Self {
            root: root.into(),
            file_size_limit,
            max_files,
        }
    }

    /// Manager using the root and limits from `config`
    #[must_use]
    pub fn from_config(config: &FileLoggerConfig) -> Self {
        Self::new(
            config.root_dir.clone(),
            config.file_size_limit,
            config.max_files,
        )
    }

    fn policy(&self, stream: &str) -> RotationPolicy {
        RotationPolicy::new(
            self.root.clone(),
            stream,
            self.file_size_limit,
            self.max_files,
        )
    }

    fn ensure_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::CatalogueNotFound {
                path: self.root.clone(),
            })
        }
    }

    /// Classify one file
    #[must_use]
    pub fn classify(path: &Path) -> FileStatus {
        read_status(path).unwrap_or(FileStatus::Unreadable)
    }

    /// Names of every stream with at least one file under the root
    pub fn streams(&self) -> Result<BTreeSet<String>> {
        self.ensure_root()?;

        let root = self.root.to_str().ok_or_else(|| {
            Error::UnknownError(format!(
                "log directory is not valid UTF-8: {}",
                self.root.display()
            ))
        })?;
        let pattern = format!("{}/*.log", Pattern::escape(root));

        let mut streams = BTreeSet::new();
        for path in glob(&pattern)
            .map_err(|e| Error::UnknownError(e.to_string()))?
            .flatten()
        {
            if let Some(name) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(LogFileName::parse)
            {
                streams.insert(name.stream);
            }
        }
        Ok(streams)
    }

    /// List and classify every file of `stream`
    pub fn scan(&self, stream: &str) -> Result<ScanReport> {
        let mut report = ScanReport::default();

        for file in self.policy(stream).list_files()? {
            let size = fs::metadata(&file.path).map_or(0, |m| m.len());
            let status = match read_status(&file.path) {
                Ok(status) => status,
                Err(source) => {
                    warn!("Log file {} is unreadable: {}", file.path.display(), source);
                    report.issues.push(Arc::new(Error::FileUnreadable {
                        path: file.path.clone(),
                        source,
                    }));
                    FileStatus::Unreadable
                }
            };

            if let FileStatus::Partial { tail_len, .. } = status {
                warn!(
                    "Log file {} ends with a partial record ({} bytes)",
                    file.path.display(),
                    tail_len
                );
                report.issues.push(Arc::new(Error::PartialRecord {
                    path: file.path.clone(),
                    tail_len,
                }));
            }

            report.files.push(ScannedFile { file, size, status });
        }

        Ok(report)
    }

    /// Concatenate runs of adjacent complete files of `stream` whose
    /// combined size stays within the file size limit.
    ///
    /// Later files are appended to the first of their run and then
    /// deleted, so records keep their order. `exclude` (the live file)
    /// and any partial or unreadable file break a run.
    pub fn merge(&self, stream: &str, exclude: Option<&Path>) -> Result<MergeReport> {
        let ScanReport { files, issues } = self.scan(stream)?;
        let mut report = MergeReport {
            issues,
            ..MergeReport::default()
        };

        let mut run: Vec<ScannedFile> = Vec::new();
        let mut run_size = 0u64;

        for file in files {
            let joinable = file.status.is_clean()
                && Some(file.path()) != exclude
                && file.size <= self.file_size_limit;

            if joinable && run_size + file.size <= self.file_size_limit {
                run_size += file.size;
                run.push(file);
                continue;
            }

            self.merge_run(std::mem::take(&mut run), &mut report);
            run_size = 0;

            if joinable {
                run_size = file.size;
                run.push(file);
            }
        }
        self.merge_run(run, &mut report);

        Ok(report)
    }

    fn merge_run(&self, run: Vec<ScannedFile>, report: &mut MergeReport) {
        let Some((target, rest)) = run.split_first() else {
            return;
        };
        if rest.is_empty() {
            return;
        }

        let mut out = match OpenOptions::new().append(true).open(target.path()) {
            Ok(file) => file,
            Err(source) => {
                report.issues.push(Arc::new(Error::FileNotWritable {
                    path: target.path().to_path_buf(),
                    source,
                }));
                return;
            }
        };
        let base_len = target.size;

        let mut copied = Vec::with_capacity(rest.len());
        for file in rest {
            let result = fs::read(file.path())
                .map_err(|source| Error::FileUnreadable {
                    path: file.path().to_path_buf(),
                    source,
                })
                .and_then(|bytes| {
                    out.write_all(&bytes)
                        .map(|()| bytes.len() as u64)
                        .map_err(|source| Error::FileWritingFailed {
                            path: target.path().to_path_buf(),
                            written: 0,
                            source,
                        })
                });

            match result {
                Ok(len) => copied.push((file.path(), len)),
                Err(e) => {
                    // Undo the partial group so no record exists twice
                    if let Err(source) = out.set_len(base_len) {
                        warn!(
                            "Failed to roll back merge into {}: {}",
                            target.path().display(),
                            source
                        );
                    }
                    report.issues.push(Arc::new(e));
                    return;
                }
            }
        }

        if let Err(source) = out.sync_data() {
            report.issues.push(Arc::new(Error::FileWritingFailed {
                path: target.path().to_path_buf(),
                written: 0,
                source,
            }));
        }

        let mut kept_len = base_len;
        for (path, len) in copied {
            match fs::remove_file(path) {
                Ok(()) => {
                    kept_len += len;
                    report.removed_files += 1;
                }
                Err(source) => {
                    // The files not yet removed keep their records;
                    // drop the copies of them from the target
                    warn!("Failed to remove merged file {}: {}", path.display(), source);
                    if let Err(e) = out.set_len(kept_len) {
                        warn!(
                            "Failed to trim merge target {}: {}",
                            target.path().display(),
                            e
                        );
                    }
                    report
                        .issues
                        .push(Arc::new(Error::Io("error removing merged log file", source)));
                    break;
                }
            }
        }

        if kept_len > base_len {
            report.merged_groups += 1;
            debug!(
                "Merged {} bytes into {}",
                kept_len - base_len,
                target.path().display()
            );
        }
    }

    /// Delete `stream`'s redundant files: those in `invalid` and empty
    /// ones. `exclude` is never touched, nor is any partial file.
    pub fn clear_unused(
        &self,
        stream: &str,
        exclude: Option<&Path>,
        invalid: &HashSet<PathBuf>,
    ) -> Result<ClearReport> {
        let scan = self.scan(stream)?;
        let mut report = ClearReport {
            removed: Vec::new(),
            issues: scan.issues,
        };

        for file in scan.files {
            if Some(file.path()) == exclude {
                continue;
            }
            let redundant =
                invalid.contains(file.path()) || file.status == FileStatus::Empty;
            if !redundant {
                continue;
            }
            remove_into(file.file.path, &mut report);
        }

        Ok(report)
    }

    /// Delete every file of `stream` except `exclude`
    pub fn remove_all(&self, stream: &str, exclude: Option<&Path>) -> Result<ClearReport> {
        let mut report = ClearReport::default();

        for file in self.policy(stream).list_files()? {
            if Some(file.path.as_path()) == exclude {
                continue;
            }
            remove_into(file.path, &mut report);
        }

        Ok(report)
    }
}

fn read_status(path: &Path) -> std::io::Result<FileStatus> {
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(FileStatus::Empty);
    }

    let scan = scan_records(&bytes);
    Ok(if scan.is_complete() {
        FileStatus::Complete {
            records: scan.records,
        }
    } else {
        FileStatus::Partial {
            records: scan.records,
            tail_len: scan.partial_tail,
        }
    })
}

fn remove_into(path: PathBuf, report: &mut ClearReport) {
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!("Removed log file {}", path.display());
            report.removed.push(path);
        }
        Err(source) => {
            warn!("Failed to remove log file {}: {}", path.display(), source);
            report
                .issues
                .push(Arc::new(Error::Io("error removing log file", source)));
        }
    }
}
