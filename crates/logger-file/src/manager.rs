//! Registry of open streams and the process-facing operations

use crate::config::FileLoggerConfig;
use crate::error::{Error, ErrorReport, Result};
use crate::recovery::{ClearReport, MergeReport, RecoveryManager};
use crate::rotation::LogFileName;
use crate::stream::{LogStream, Maintenance, MaintenanceOutcome, StreamHandle, StreamState};
use parking_lot::Mutex;
use proven_logger::Record;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reports queued beyond this are dropped until someone reads the channel
pub const ERROR_CHANNEL_CAPACITY: usize = 1024;

/// Owns every open stream under one root directory.
///
/// Construct one at startup and pass it (or an `Arc` of it) to whatever
/// needs to open streams. Dropping it closes every stream.
pub struct LogFileManager {
    config: FileLoggerConfig,
    recovery: RecoveryManager,
    streams: Mutex<HashMap<String, LogStream>>,
    /// Held while a name is opened, closed or maintained while dormant
    names: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    invalid: Mutex<HashSet<PathBuf>>,
    report_tx: flume::Sender<ErrorReport>,
    report_rx: flume::Receiver<ErrorReport>,
}

impl LogFileManager {
    /// Create a manager after validating `config`
    pub fn new(config: FileLoggerConfig) -> Result<Self> {
        config.validate()?;

        let (report_tx, report_rx) = flume::bounded(ERROR_CHANNEL_CAPACITY);
        Ok(Self {
            recovery: RecoveryManager::from_config(&config),
            config,
            streams: Mutex::new(HashMap::new()),
            names: Mutex::new(HashMap::new()),
            invalid: Mutex::new(HashSet::new()),
            report_tx,
            report_rx,
        })
    }

    /// The configuration in use
    pub fn config(&self) -> &FileLoggerConfig {
        &self.config
    }

    /// Receiver for failures observed off the caller's thread: write
    /// errors, missing files, ambiguous files found by recovery
    pub fn error_reports(&self) -> flume::Receiver<ErrorReport> {
        self.report_rx.clone()
    }

    /// Files recovery could not read; they are left in place until
    /// `clear_unused_log_files` deletes them or a mark is cleared
    pub fn invalid_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<_> = self.invalid.lock().iter().cloned().collect();
        files.sort();
        files
    }

    /// Forget that `path` was found unreadable, leaving the file in place.
    /// Returns whether it was marked.
    pub fn clear_mark(&self, path: &Path) -> bool {
        let cleared = self.invalid.lock().remove(path);
        if cleared {
            debug!("Cleared invalid mark on {}", path.display());
        }
        cleared
    }

    /// Forget every unreadable mark on `stream`'s files. Returns how many
    /// were cleared.
    pub fn clear_marks(&self, stream: &str) -> usize {
        let mut invalid = self.invalid.lock();
        let before = invalid.len();
        invalid.retain(|path| !belongs_to(path, stream));

        let cleared = before - invalid.len();
        if cleared > 0 {
            debug!("Cleared {} invalid marks of stream {}", cleared, stream);
        }
        cleared
    }

    /// Open `name`, or return the handle of the already open stream.
    ///
    /// Directory and permission failures are returned, not retried.
    pub fn open_stream(&self, name: &str) -> Result<StreamHandle> {
        validate_stream_name(name)?;
        if let Some(handle) = self.stream(name) {
            return Ok(handle);
        }

        // Recovery reads the stream's files; only this name waits for it
        let guard = self.name_guard(name);
        let _held = guard.lock();
        if let Some(handle) = self.stream(name) {
            return Ok(handle);
        }

        let (stream, scan) = LogStream::open(&self.config, name, self.report_tx.clone())?;

        self.invalid
            .lock()
            .extend(scan.unreadable().map(PathBuf::from));
        self.publish(name, &scan.issues);

        let handle = stream.handle().clone();
        self.streams.lock().insert(name.to_string(), stream);
        Ok(handle)
    }

    /// Look up an open stream
    pub fn stream(&self, name: &str) -> Option<StreamHandle> {
        self.streams.lock().get(name).map(|s| s.handle().clone())
    }

    /// Names of the open streams
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.streams.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Hand `record` to `handle`'s stream
    pub fn log(&self, handle: &StreamHandle, record: Record) -> Result<()> {
        handle.log(record)
    }

    /// Write out everything `handle`'s stream holds
    pub fn flush(&self, handle: &StreamHandle) -> Result<()> {
        handle.flush()
    }

    /// Drain and close `handle`'s stream, waiting for its worker to exit
    pub fn close_stream(&self, handle: &StreamHandle) -> Result<()> {
        let guard = self.name_guard(handle.name());
        let _held = guard.lock();

        let stream = {
            let mut streams = self.streams.lock();
            let registered = streams
                .get(handle.name())
                .is_some_and(|s| s.handle().same_stream(handle));
            if registered {
                streams.remove(handle.name())
            } else {
                None
            }
        };

        match stream {
            Some(mut stream) => stream.shutdown(),
            None if handle.state() == StreamState::Closed => Ok(()),
            None => Err(Error::StreamClosed(handle.name().to_string())),
        }
    }

    /// Concatenate adjacent small complete files of every stream under
    /// the root. Open streams' active files are left alone.
    pub fn merge_log_files(&self) -> Result<MergeReport> {
        let live = self.live_handles();
        let mut report = MergeReport::default();

        for handle in &live {
            match handle.maintain(Maintenance::Merge) {
                Ok(MaintenanceOutcome::Merged(merged)) => {
                    self.publish(handle.name(), &merged.issues);
                    report.absorb(merged);
                }
                Ok(MaintenanceOutcome::Cleared(_)) => {}
                Err(e) => self.fail(handle.name(), e, &mut report.issues),
            }
        }

        self.each_dormant(|stream| {
            let merged = self.recovery.merge(stream, None)?;
            self.publish(stream, &merged.issues);
            report.absorb(merged);
            Ok(())
        })?;

        debug!(
            "Merged {} groups, removed {} files",
            report.merged_groups, report.removed_files
        );
        Ok(report)
    }

    /// Reopen the files of streams whose active file was removed and
    /// write out what they held meanwhile. Returns the restored streams.
    pub fn restore_log_files(&self) -> Result<Vec<String>> {
        let mut restored = Vec::new();

        for handle in self.live_handles() {
            let missing = !handle.active_path().exists();
            if handle.state() != StreamState::Invalidated && !missing {
                continue;
            }

            match handle.restore() {
                Ok(true) => {
                    info!("Restored log stream {}", handle.name());
                    restored.push(handle.name().to_string());
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to restore log stream {}: {}", handle.name(), e);
                    self.publish(handle.name(), &[Arc::new(e)]);
                }
            }
        }

        Ok(restored)
    }

    /// Delete every log file under the root. Open streams continue in a
    /// fresh file.
    pub fn clear_all_log_files(&self) -> Result<ClearReport> {
        let live = self.live_handles();
        let mut report = ClearReport::default();

        for handle in &live {
            match handle.maintain(Maintenance::Wipe) {
                Ok(MaintenanceOutcome::Cleared(cleared)) => {
                    self.publish(handle.name(), &cleared.issues);
                    report.absorb(cleared);
                }
                Ok(MaintenanceOutcome::Merged(_)) => {}
                Err(e) => self.fail(handle.name(), e, &mut report.issues),
            }
        }

        self.each_dormant(|stream| {
            let cleared = self.recovery.remove_all(stream, None)?;
            self.publish(stream, &cleared.issues);
            report.absorb(cleared);
            Ok(())
        })?;

        self.forget_invalid(&report.removed);
        info!("Cleared {} log files", report.removed.len());
        Ok(report)
    }

    /// Delete files recovery marked unreadable and empty files that are
    /// not in use. Partially written files are kept and reported.
    pub fn clear_unused_log_files(&self) -> Result<ClearReport> {
        let invalid = self.invalid.lock().clone();
        let live = self.live_handles();
        let mut report = ClearReport::default();

        for handle in &live {
            match handle.maintain(Maintenance::ClearUnused(invalid.clone())) {
                Ok(MaintenanceOutcome::Cleared(cleared)) => {
                    self.publish(handle.name(), &cleared.issues);
                    report.absorb(cleared);
                }
                Ok(MaintenanceOutcome::Merged(_)) => {}
                Err(e) => self.fail(handle.name(), e, &mut report.issues),
            }
        }

        self.each_dormant(|stream| {
            let cleared = self.recovery.clear_unused(stream, None, &invalid)?;
            self.publish(stream, &cleared.issues);
            report.absorb(cleared);
            Ok(())
        })?;

        self.forget_invalid(&report.removed);
        debug!("Cleared {} unused log files", report.removed.len());
        Ok(report)
    }

    /// Close every stream, waiting for each to drain
    pub fn shutdown(&self) -> Result<()> {
        let streams: Vec<_> = self.streams.lock().drain().map(|(_, s)| s).collect();

        let mut result = Ok(());
        for mut stream in streams {
            if let Err(e) = stream.shutdown() {
                error!("Failed to close log stream {}: {}", stream.handle().name(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn live_handles(&self) -> Vec<StreamHandle> {
        self.streams
            .lock()
            .values()
            .map(|s| s.handle().clone())
            .collect()
    }

    fn name_guard(&self, name: &str) -> Arc<Mutex<()>> {
        self.names.lock().entry(name.to_string()).or_default().clone()
    }

    /// Run `task` for each stream with files under the root that is not
    /// open. The name stays held so it cannot be opened meanwhile.
    fn each_dormant(&self, mut task: impl FnMut(&str) -> Result<()>) -> Result<()> {
        for stream in self.recovery.streams()? {
            let guard = self.name_guard(&stream);
            let _held = guard.lock();
            if self.streams.lock().contains_key(&stream) {
                continue;
            }
            task(&stream)?;
        }
        Ok(())
    }

    fn forget_invalid(&self, removed: &[PathBuf]) {
        let mut invalid = self.invalid.lock();
        for path in removed {
            invalid.remove(path);
        }
    }

    fn fail(&self, stream: &str, error: Error, issues: &mut Vec<Arc<Error>>) {
        let error = Arc::new(error);
        self.publish(stream, &[error.clone()]);
        issues.push(error);
    }

    fn publish(&self, stream: &str, issues: &[Arc<Error>]) {
        for error in issues {
            if self
                .report_tx
                .try_send(ErrorReport::new(stream, error.clone()))
                .is_err()
            {
                warn!("Error channel full, dropping report for stream {}", stream);
            }
        }
    }
}

impl Drop for LogFileManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to shut down log file manager: {}", e);
        }
    }
}

fn belongs_to(path: &Path, stream: &str) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(LogFileName::parse)
        .is_some_and(|name| name.stream == stream)
}

/// Stream names become file name prefixes, so they must be a single,
/// ordinary path component
fn validate_stream_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidStreamName(name.to_string()))
    }
}
