//! Crash-tolerant rotating file logger
//!
//! Application threads hand records to a stream; a worker thread per
//! stream batches them in fixed-size buffers and writes them to files
//! that rotate by size and are pruned by count:
//! - `BufferPool` hands buffers between producers and the worker without
//!   producers ever waiting on disk
//! - `FileWriter` and `RotationPolicy` own the files and their names
//! - `RecoveryManager` classifies, merges and clears files left on disk
//! - `LogFileManager` is the registry of open streams and the entry point
//!   for maintenance
//!
//! # Example
//! ```no_run
//! use proven_logger::{Level, Record};
//! use proven_logger_file::{FileLoggerConfig, LogFileManager};
//!
//! let config = FileLoggerConfig::builder().root_dir("/var/log/app").build()?;
//! let manager = LogFileManager::new(config)?;
//!
//! let stream = manager.open_stream("server")?;
//! stream.log(Record::new(Level::Info, "listening"))?;
//! manager.close_stream(&stream)?;
//! # Ok::<(), proven_logger_file::Error>(())
//! ```

#![warn(missing_docs, unreachable_pub)]
#![forbid(unsafe_code)]

mod buffer;
mod config;
mod error;
mod manager;
mod pool;
mod recovery;
mod rotation;
mod sink;
mod stream;
mod writer;

pub use buffer::{BufferId, CapacityExceeded, FixedBuffer};
pub use config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_FILE_SIZE_LIMIT, DEFAULT_MAX_BUFFERS, DEFAULT_MAX_FILES,
    DEFAULT_MAX_RECORD_LEN, DEFAULT_RETRY_LIMIT, FileLoggerConfig, FileLoggerConfigBuilder,
};
pub use error::{Error, ErrorKind, ErrorReport, Result};
pub use manager::{ERROR_CHANNEL_CAPACITY, LogFileManager};
pub use pool::{AppendResult, BufferPool, Next, PoolStats, Rejection};
pub use recovery::{
    ClearReport, FileStatus, MergeReport, RecordScan, RecoveryManager, ScanReport, ScannedFile,
    scan_records,
};
pub use rotation::{LogFile, LogFileName, Retention, Rotation, RotationPolicy};
pub use sink::{FileSink, Sink};
pub use stream::{StreamHandle, StreamState, StreamStats};
pub use writer::FileWriter;
