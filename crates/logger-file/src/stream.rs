//! One log stream: its buffer pool, its file and the worker thread
//! that moves buffers from one to the other
//!
//! Producers only ever touch the pool. The worker owns the `FileWriter`
//! and is the only thread that writes, rotates or reopens the stream's
//! file. Control requests (flush, restore, maintenance, shutdown) reach
//! the worker as `Command`s on a channel, each followed by a pool signal
//! so a worker blocked waiting for buffers wakes up to read them.

use crate::buffer::FixedBuffer;
use crate::config::FileLoggerConfig;
use crate::error::{Error, ErrorReport, Result};
use crate::pool::{AppendResult, BufferPool, Next, PoolStats, Rejection};
use crate::recovery::{ClearReport, MergeReport, RecoveryManager, ScanReport};
use crate::rotation::RotationPolicy;
use crate::writer::FileWriter;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use proven_logger::{RECORD_TERMINATOR, Record, encode};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::mem;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Lifecycle of a stream as seen from outside the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamState {
    /// Accepting records and writing them out
    Active = 0,
    /// The active file vanished; records are held in memory until restored
    Invalidated = 1,
    /// Close requested; pending buffers are being written out
    Draining = 2,
    /// The worker has exited
    Closed = 3,
}

impl StreamState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Invalidated,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }

    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Invalidated)
                | (Self::Invalidated, Self::Active)
                | (Self::Active | Self::Invalidated, Self::Draining)
                | (Self::Active | Self::Invalidated | Self::Draining, Self::Closed)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Invalidated => "invalidated",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Counters for one stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Records that reached the file
    pub records_written: u64,
    /// Bytes that reached the file
    pub bytes_written: u64,
    /// Records dropped: refused by the pool or given up after retries
    pub lost_records: u64,
    /// Failed write attempts, retried or not
    pub write_failures: u64,
    /// Completed rotations
    pub rotations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    records_written: AtomicU64,
    bytes_written: AtomicU64,
    lost_records: AtomicU64,
    write_failures: AtomicU64,
    rotations: AtomicU64,
}

impl Counters {
    fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StreamStats {
        StreamStats {
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            lost_records: self.lost_records.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
        }
    }
}

/// File housekeeping run on the worker so it cannot race a rotation
#[derive(Debug)]
pub(crate) enum Maintenance {
    Merge,
    ClearUnused(HashSet<PathBuf>),
    Wipe,
}

#[derive(Debug)]
pub(crate) enum MaintenanceOutcome {
    Merged(MergeReport),
    Cleared(ClearReport),
}

enum Command {
    Flush(flume::Sender<Result<()>>),
    Restore(flume::Sender<Result<bool>>),
    Maintain(Maintenance, flume::Sender<Result<MaintenanceOutcome>>),
    Shutdown(flume::Sender<()>),
}

struct Shared {
    name: String,
    created_at: DateTime<Utc>,
    dir: PathBuf,
    max_record_len: usize,
    pool: BufferPool,
    state: AtomicU8,
    stats: Counters,
    active_path: Mutex<PathBuf>,
    /// Set while records are being refused, so one report covers a run
    refusing: AtomicBool,
    commands: flume::Sender<Command>,
    reports: flume::Sender<ErrorReport>,
}

impl Shared {
    fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, next: StreamState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                StreamState::from_u8(current)
                    .can_become(next)
                    .then_some(next as u8)
            })
            .is_ok()
    }

    fn report(&self, error: impl Into<Arc<Error>>) {
        let report = ErrorReport::new(self.name.clone(), error);
        if self.reports.try_send(report).is_err() {
            debug!("Error channel full, dropping report for stream {}", self.name);
        }
    }
}

/// Cheap, cloneable reference to an open stream
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl StreamHandle {
    /// Stream name, also the prefix of its file names
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// When the stream was opened
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.shared.created_at
    }

    /// Directory holding the stream's files
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.shared.dir
    }

    /// Path of the file currently being written
    #[must_use]
    pub fn active_path(&self) -> PathBuf {
        self.shared.active_path.lock().clone()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Whether the stream's file is known to be in place
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.state() != StreamState::Invalidated
    }

    /// Whether the worker is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() != StreamState::Closed
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.shared.stats.snapshot()
    }

    /// Buffer accounting snapshot
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Hand a record to the stream without waiting for disk.
    ///
    /// Text longer than the configured maximum is truncated. A record the
    /// pool cannot take is counted as lost and reported on the error
    /// channel; only a closed stream is an error here.
    pub fn log(&self, mut record: Record) -> Result<()> {
        let shared = &self.shared;
        if matches!(shared.state(), StreamState::Draining | StreamState::Closed) {
            return Err(Error::StreamClosed(shared.name.clone()));
        }

        record.truncate(shared.max_record_len);
        let line = fit_line(encode(&record), shared.pool.buffer_size());

        match shared.pool.append(line.as_bytes()) {
            AppendResult::Written { .. } => {
                shared.refusing.store(false, Ordering::Relaxed);
                Ok(())
            }
            AppendResult::Rejected(Rejection::Closed) => {
                Err(Error::StreamClosed(shared.name.clone()))
            }
            AppendResult::Rejected(rejection) => {
                Counters::add(&shared.stats.lost_records, 1);
                if !shared.refusing.swap(true, Ordering::Relaxed) {
                    warn!("Stream {} is dropping records: {}", shared.name, rejection);
                    shared.report(Error::RecordDropped(rejection));
                }
                Ok(())
            }
        }
    }

    /// Write out everything logged so far and sync the file.
    ///
    /// Fails with `FileNotFound` while the stream is invalidated; the
    /// records stay buffered until a restore.
    pub fn flush(&self) -> Result<()> {
        self.request(Command::Flush)
    }

    pub(crate) fn restore(&self) -> Result<bool> {
        self.request(Command::Restore)
    }

    pub(crate) fn maintain(&self, task: Maintenance) -> Result<MaintenanceOutcome> {
        self.request(|ack| Command::Maintain(task, ack))
    }

    fn request<T>(&self, command: impl FnOnce(flume::Sender<Result<T>>) -> Command) -> Result<T> {
        let (ack, reply) = flume::bounded(1);
        self.shared
            .commands
            .send(command(ack))
            .map_err(|_| Error::StreamClosed(self.shared.name.clone()))?;
        self.shared.pool.signal();

        reply
            .recv()
            .map_err(|_| Error::StreamClosed(self.shared.name.clone()))?
    }

    pub(crate) fn same_stream(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Cap an encoded line at `capacity` bytes, keeping its terminator
fn fit_line(mut line: String, capacity: usize) -> String {
    if line.len() <= capacity {
        return line;
    }

    let mut cut = capacity.saturating_sub(1);
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line.truncate(cut);
    line.push('\n');
    line
}

/// A running stream together with its worker thread
pub(crate) struct LogStream {
    handle: StreamHandle,
    worker: Option<JoinHandle<()>>,
}

impl LogStream {
    /// Recover the stream's files and start its worker.
    ///
    /// The newest existing file is resumed when it ends cleanly and has
    /// room left; otherwise a new file is started.
    pub(crate) fn open(
        config: &FileLoggerConfig,
        name: &str,
        reports: flume::Sender<ErrorReport>,
    ) -> Result<(Self, ScanReport)> {
        fs::create_dir_all(&config.root_dir).map_err(|source| Error::CatalogueCreationFailed {
            path: config.root_dir.clone(),
            source,
        })?;

        let policy = RotationPolicy::from_config(config, name);
        let recovery = RecoveryManager::from_config(config);
        let scan = recovery.scan(name)?;

        let writer = match scan.newest() {
            Some(newest)
                if newest.status.is_clean() && newest.size < config.file_size_limit =>
            {
                FileWriter::open(newest.path(), config.file_size_limit)?
            }
            _ => policy.open_next()?,
        };
        let retention = policy.enforce_retention(writer.path());

        let (commands, receiver) = flume::unbounded();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            created_at: Utc::now(),
            dir: config.root_dir.clone(),
            max_record_len: config.max_record_len,
            pool: BufferPool::from_config(config),
            state: AtomicU8::new(StreamState::Active as u8),
            stats: Counters::default(),
            active_path: Mutex::new(writer.path().to_path_buf()),
            refusing: AtomicBool::new(false),
            commands,
            reports,
        });

        for (_, source) in retention.failed {
            shared.report(Error::Io("error removing old log file", source));
        }

        info!(
            "Opened log stream {} at {}",
            name,
            writer.path().display()
        );

        let worker = Worker {
            shared: shared.clone(),
            commands: receiver,
            writer,
            policy,
            recovery,
            parked: VecDeque::new(),
            invalid: false,
            retry_limit: config.retry_limit,
        };

        let thread = thread::Builder::new()
            .name(format!("logfile-{name}"))
            .spawn(move || worker.run())
            .map_err(|e| Error::Io("error spawning log worker", e))?;

        Ok((
            Self {
                handle: StreamHandle { shared },
                worker: Some(thread),
            },
            scan,
        ))
    }

    pub(crate) fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    /// Drain, flush and stop the worker, waiting for it to exit
    pub(crate) fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let shared = &self.handle.shared;
        shared.transition(StreamState::Draining);

        let (ack, done) = flume::bounded(1);
        if shared.commands.send(Command::Shutdown(ack)).is_ok() {
            shared.pool.signal();
            // A disconnect means the worker already exited
            let _ = done.recv();
        }

        let joined = worker
            .join()
            .map_err(|_| Error::UnknownError(format!("log worker for {} panicked", shared.name)));
        shared.transition(StreamState::Closed);
        joined
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to close log stream {}: {}", self.handle.name(), e);
        }
    }
}

/// Write a buffer, retrying up to `retry_limit` times on failure.
///
/// A retry resumes after the bytes that did land. Each failed attempt is
/// passed to `on_failure`. When the retries run out, whatever part of the
/// buffer reached the file is cut off again so no torn record is left in
/// front of the next one.
pub(crate) fn write_with_retry(
    writer: &mut FileWriter,
    buffer: &FixedBuffer,
    retry_limit: u32,
    mut on_failure: impl FnMut(Error),
) -> Result<()> {
    let bytes = buffer.as_bytes();
    let start = writer.bytes_written();
    let mut offset = 0;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match writer.append(&bytes[offset..]) {
            Ok(()) => return Ok(()),
            Err(Error::FileWritingFailed {
                path,
                written,
                source,
            }) => {
                offset += written;
                warn!(
                    "Write attempt {} to {} failed: {}",
                    attempts,
                    path.display(),
                    source
                );
                on_failure(Error::FileWritingFailed {
                    path: path.clone(),
                    written,
                    source,
                });

                if attempts > retry_limit {
                    discard_partial(writer, start);
                    return Err(Error::RetryLimitExceeded {
                        path,
                        attempts,
                        lost_records: buffer.records(),
                    });
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Drop the bytes written after `len`. If the file cannot be cut, end the
/// fragment with a terminator so it stays a line of its own.
fn discard_partial(writer: &mut FileWriter, len: u64) {
    if writer.bytes_written() <= len {
        return;
    }

    if let Err(e) = writer.truncate(len) {
        warn!(
            "Failed to discard partial write in {}: {}",
            writer.path().display(),
            e
        );
        if let Err(e) = writer.append(&[RECORD_TERMINATOR]) {
            warn!("Failed to terminate partial record: {}", e);
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    commands: flume::Receiver<Command>,
    writer: FileWriter,
    policy: RotationPolicy,
    recovery: RecoveryManager,
    /// Buffers held back while the file is missing, oldest first
    parked: VecDeque<FixedBuffer>,
    invalid: bool,
    retry_limit: u32,
}

impl Worker {
    fn run(mut self) {
        debug!("Starting log worker for stream {}", self.shared.name);

        loop {
            match self.shared.pool.take_next_full() {
                Next::Full(buffer) => self.write_buffer(buffer),
                Next::Signal => {
                    while let Ok(command) = self.commands.try_recv() {
                        if self.handle(command).is_break() {
                            return;
                        }
                    }
                }
                Next::Closed => {
                    self.finish();
                    return;
                }
            }
        }
    }

    fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Flush(ack) => {
                let _ = ack.send(self.flush());
            }
            Command::Restore(ack) => {
                let _ = ack.send(self.restore());
            }
            Command::Maintain(task, ack) => {
                let _ = ack.send(self.maintain(task));
            }
            Command::Shutdown(ack) => {
                self.finish();
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn write_pending(&mut self) {
        while let Some(buffer) = self.shared.pool.try_take_full() {
            self.write_buffer(buffer);
        }
    }

    /// Write every full buffer, then the partly filled current one
    fn drain(&mut self) {
        self.write_pending();
        if self.shared.pool.request_flush() {
            self.write_pending();
        }
    }

    fn write_buffer(&mut self, buffer: FixedBuffer) {
        if buffer.is_empty() {
            self.shared.pool.recycle(buffer);
            return;
        }

        if !self.invalid && !self.writer.is_present() {
            self.invalidate();
        }
        if self.invalid {
            self.parked.push_back(buffer);
            return;
        }

        let shared = &self.shared;
        let records = buffer.records();
        let result = write_with_retry(&mut self.writer, &buffer, self.retry_limit, |e| {
            Counters::add(&shared.stats.write_failures, 1);
            shared.report(e);
        });

        match result {
            Ok(()) => {
                Counters::add(&shared.stats.records_written, records);
                Counters::add(&shared.stats.bytes_written, buffer.len());
            }
            Err(e) => {
                error!(
                    "Dropping {} records of stream {}: {}",
                    records, shared.name, e
                );
                Counters::add(&shared.stats.lost_records, records);
                shared.report(e);
            }
        }
        shared.pool.recycle(buffer);

        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush {}: {}", self.writer.path().display(), e);
            self.shared.report(e);
        }

        if self.writer.is_full() {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        match self.policy.rotate(&mut self.writer) {
            Ok(rotation) => {
                Counters::add(&self.shared.stats.rotations, 1);
                *self.shared.active_path.lock() = self.writer.path().to_path_buf();
                for (_, source) in rotation.retention.failed {
                    self.shared
                        .report(Error::Io("error removing old log file", source));
                }
            }
            Err(e) => {
                error!("Failed to rotate log stream {}: {}", self.shared.name, e);
                self.shared.report(e);
            }
        }
    }

    fn invalidate(&mut self) {
        let path = self.writer.path().to_path_buf();
        warn!(
            "Log file {} was removed, holding records until restored",
            path.display()
        );

        self.invalid = true;
        self.shared.transition(StreamState::Invalidated);
        self.shared.report(Error::FileNotFound { path });
    }

    fn flush(&mut self) -> Result<()> {
        self.drain();

        if !self.invalid && !self.writer.is_present() {
            self.invalidate();
        }
        if self.invalid {
            return Err(Error::FileNotFound {
                path: self.writer.path().to_path_buf(),
            });
        }
        self.writer.flush()
    }

    /// Reopen the active path if the file went missing and write out the
    /// records held back in the meantime, oldest first
    fn restore(&mut self) -> Result<bool> {
        if !self.invalid && self.writer.is_present() {
            return Ok(false);
        }

        let path = self.writer.path().to_path_buf();
        self.writer = FileWriter::open(&path, self.policy.file_size_limit())?;
        self.revalidate();
        info!("Restored log file {}", path.display());

        self.drain();
        Ok(true)
    }

    fn revalidate(&mut self) {
        self.invalid = false;
        self.shared.transition(StreamState::Active);

        for buffer in mem::take(&mut self.parked) {
            self.write_buffer(buffer);
        }
    }

    fn maintain(&mut self, task: Maintenance) -> Result<MaintenanceOutcome> {
        let name = self.shared.name.clone();
        match task {
            Maintenance::Merge => self
                .recovery
                .merge(&name, Some(self.writer.path()))
                .map(MaintenanceOutcome::Merged),
            Maintenance::ClearUnused(invalid) => self
                .recovery
                .clear_unused(&name, Some(self.writer.path()), &invalid)
                .map(MaintenanceOutcome::Cleared),
            Maintenance::Wipe => self.wipe().map(MaintenanceOutcome::Cleared),
        }
    }

    /// Start a fresh file and delete every other file of the stream
    fn wipe(&mut self) -> Result<ClearReport> {
        self.drain();

        let next = self.policy.open_next()?;
        let previous = mem::replace(&mut self.writer, next);
        if let Err(e) = previous.close() {
            debug!("Failed to flush wiped log file: {}", e);
        }
        *self.shared.active_path.lock() = self.writer.path().to_path_buf();

        if self.invalid {
            self.revalidate();
        }

        self.recovery
            .remove_all(&self.shared.name, Some(self.writer.path()))
    }

    /// Stop accepting records and write out everything still held
    fn finish(&mut self) {
        self.shared.pool.close();
        self.drain();

        if self.invalid {
            if let Err(e) = self.restore() {
                error!(
                    "Failed to restore log stream {} on close, {} buffers lost: {}",
                    self.shared.name,
                    self.parked.len(),
                    e
                );
                self.shared.report(e);
                self.discard_parked();
            }
        }

        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush {} on close: {}", self.writer.path().display(), e);
            self.shared.report(e);
        }

        info!("Closed log stream {}", self.shared.name);
    }

    /// Give up on held buffers, counting their records as lost
    fn discard_parked(&mut self) {
        let lost: usize = self.parked.iter().map(FixedBuffer::records).sum();
        Counters::add(&self.shared.stats.lost_records, lost);

        for buffer in mem::take(&mut self.parked) {
            self.shared.pool.recycle(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proven_logger::Level;
    use tempfile::TempDir;

    fn config(dir: &Path) -> FileLoggerConfig {
        FileLoggerConfig::builder()
            .root_dir(dir)
            .build()
            .unwrap()
    }

    fn open(config: &FileLoggerConfig, name: &str) -> LogStream {
        let (reports, _) = flume::unbounded();
        LogStream::open(config, name, reports).unwrap().0
    }

    #[test]
    fn test_state_transitions() {
        use StreamState::*;

        assert!(Active.can_become(Invalidated));
        assert!(Invalidated.can_become(Active));
        assert!(Invalidated.can_become(Draining));
        assert!(Draining.can_become(Closed));
        assert!(!Draining.can_become(Active));
        assert!(!Closed.can_become(Active));
        assert!(!Closed.can_become(Closed));
    }

    #[test]
    fn test_fit_line() {
        assert_eq!(fit_line("short\n".into(), 16), "short\n");
        assert_eq!(fit_line("0123456789\n".into(), 6), "01234\n");
        // Never cuts inside a character
        assert_eq!(fit_line("aé\n".into(), 3), "a\n");
    }

    #[test]
    fn test_log_flush_close() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let mut stream = open(&config, "app");
        let handle = stream.handle().clone();

        handle.log(Record::new(Level::Info, "one")).unwrap();
        handle.log(Record::new(Level::Warning, "two")).unwrap();
        handle.flush().unwrap();

        let contents = fs::read_to_string(handle.active_path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] one"));
        assert!(lines[1].starts_with("[Warning]"));
        assert_eq!(handle.stats().records_written, 2);

        stream.shutdown().unwrap();
        assert_eq!(handle.state(), StreamState::Closed);
        assert!(!handle.is_running());
        assert!(matches!(
            handle.log(Record::new(Level::Info, "late")),
            Err(Error::StreamClosed(_))
        ));
        assert!(matches!(handle.flush(), Err(Error::StreamClosed(_))));
    }

    #[test]
    fn test_long_record_truncated() {
        let temp_dir = TempDir::new().unwrap();
        let config = FileLoggerConfig::builder()
            .root_dir(temp_dir.path())
            .max_record_len(8)
            .build()
            .unwrap();
        let mut stream = open(&config, "app");
        let handle = stream.handle().clone();

        handle
            .log(Record::new(Level::Info, "abcdefghijklmnop"))
            .unwrap();
        stream.shutdown().unwrap();

        let contents = fs::read_to_string(handle.active_path()).unwrap();
        assert!(contents.ends_with("] abcdefgh\n"));
    }

    #[test]
    fn test_shutdown_drains_pending_records() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let mut stream = open(&config, "app");
        let handle = stream.handle().clone();

        for i in 0..500 {
            handle.log(Record::new(Level::Info, format!("record {i}"))).unwrap();
        }
        stream.shutdown().unwrap();

        let contents = fs::read_to_string(handle.active_path()).unwrap();
        assert_eq!(contents.lines().count(), 500);
        assert!(contents.lines().last().unwrap().ends_with("] record 499"));
        assert!(handle.pool_stats().is_balanced());
    }

    #[test]
    fn test_flush_reports_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let (reports, errors) = flume::unbounded();
        let (mut stream, _) = LogStream::open(&config, "app", reports).unwrap();
        let handle = stream.handle().clone();

        fs::remove_file(handle.active_path()).unwrap();
        handle.log(Record::new(Level::Info, "held")).unwrap();

        assert!(matches!(handle.flush(), Err(Error::FileNotFound { .. })));
        assert_eq!(handle.state(), StreamState::Invalidated);
        assert!(!handle.is_valid());
        assert_eq!(
            errors.try_recv().unwrap().kind(),
            crate::error::ErrorKind::FileNotFound
        );

        assert!(handle.restore().unwrap());
        assert_eq!(handle.state(), StreamState::Active);
        let contents = fs::read_to_string(handle.active_path()).unwrap();
        assert!(contents.ends_with("] held\n"));

        stream.shutdown().unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_with_retry_gives_up() {
        let mut writer = FileWriter::open("/dev/full", u64::MAX).unwrap();
        let mut buffer = FixedBuffer::new(64);
        buffer.append(b"first\n").unwrap();
        buffer.append(b"second\n").unwrap();

        let mut failures = 0;
        let err = write_with_retry(&mut writer, &buffer, 1, |_| failures += 1).unwrap_err();

        assert_eq!(failures, 2);
        match err {
            Error::RetryLimitExceeded {
                attempts,
                lost_records,
                ..
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(lost_records, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_close_counts_records_it_cannot_restore() {
        let temp_dir = TempDir::new().unwrap();
        let config = config(temp_dir.path());
        let mut stream = open(&config, "app");
        let handle = stream.handle().clone();

        // A directory where the file was makes the reopen fail
        let path = handle.active_path();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        handle.log(Record::new(Level::Info, "one")).unwrap();
        handle.log(Record::new(Level::Info, "two")).unwrap();
        assert!(matches!(handle.flush(), Err(Error::FileNotFound { .. })));

        stream.shutdown().unwrap();

        let stats = handle.stats();
        assert_eq!(stats.lost_records, 2);
        assert_eq!(stats.records_written, 0);
        let pool = handle.pool_stats();
        assert_eq!(pool.in_flight, 0);
        assert!(pool.is_balanced());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_give_up_discards_partial_write() {
        const DIR_VAR: &str = "PROVEN_LOGGER_FILE_PARTIAL_WRITE_DIR";

        // Re-run in a child whose file size limit cuts the write short
        if let Some(dir) = std::env::var_os(DIR_VAR) {
            let path = Path::new(&dir).join("app.log");
            let kept = "[Info] kept\n".repeat(8);
            fs::write(&path, &kept).unwrap();

            let mut writer = FileWriter::open(&path, u64::MAX).unwrap();
            let mut buffer = FixedBuffer::new(4096);
            let record = format!("[Info] {}\n", "x".repeat(1500));
            buffer.append(record.as_bytes()).unwrap();
            buffer.append(record.as_bytes()).unwrap();

            let mut failures = 0;
            let err = write_with_retry(&mut writer, &buffer, 1, |_| failures += 1).unwrap_err();
            assert!(matches!(
                err,
                Error::RetryLimitExceeded {
                    lost_records: 2,
                    ..
                }
            ));
            assert_eq!(failures, 2);
            assert_eq!(writer.bytes_written(), kept.len() as u64);
            drop(writer);

            let bytes = fs::read(&path).unwrap();
            assert_eq!(bytes, kept.as_bytes());
            assert!(crate::recovery::scan_records(&bytes).is_complete());
            return;
        }

        let temp_dir = TempDir::new().unwrap();
        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(r#"trap '' XFSZ; ulimit -f 1 && exec "$0" "$1" --test-threads=1"#)
            .arg(std::env::current_exe().unwrap())
            .arg("test_give_up_discards_partial_write")
            .env(DIR_VAR, temp_dir.path())
            .status()
            .unwrap();
        assert!(status.success());
    }
}
