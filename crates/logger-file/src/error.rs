//! Error types for file-based logging

use crate::pool::Rejection;
use chrono::{DateTime, Utc};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Result type for file logger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur during file logging
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A log file that should exist is gone
    #[error("log file not found: {path}")]
    FileNotFound {
        /// The missing file
        path: PathBuf,
    },

    /// A log file could not be created or opened for appending
    #[error("log file {path} is not writable: {source}")]
    FileNotWritable {
        /// The file that could not be opened
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// A write to an open log file failed part way
    #[error("failed writing to {path} after {written} bytes: {source}")]
    FileWritingFailed {
        /// The file being written
        path: PathBuf,
        /// Bytes that reached the file before the failure
        written: usize,
        /// The underlying error
        source: io::Error,
    },

    /// The log directory does not exist
    #[error("log directory not found: {path}")]
    CatalogueNotFound {
        /// The missing directory
        path: PathBuf,
    },

    /// Failed to create log directory
    #[error("failed to create log directory at {path}: {source}")]
    CatalogueCreationFailed {
        /// The path that failed to be created
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// A buffer could not be written within the retry budget and was dropped
    #[error("gave up writing to {path} after {attempts} attempts, {lost_records} records lost")]
    RetryLimitExceeded {
        /// The file being written
        path: PathBuf,
        /// Number of write attempts made
        attempts: u32,
        /// Records discarded with the buffer
        lost_records: usize,
    },

    /// A log file could not be read during recovery
    #[error("log file {path} is unreadable: {source}")]
    FileUnreadable {
        /// The file that could not be read
        path: PathBuf,
        /// The underlying error
        source: io::Error,
    },

    /// A log file ends in the middle of a record; it is left in place
    #[error("log file {path} ends with {tail_len} bytes of a partial record")]
    PartialRecord {
        /// The ambiguous file
        path: PathBuf,
        /// Bytes after the last complete record
        tail_len: usize,
    },

    /// A record was refused by the stream's buffers and counted as lost
    #[error("record dropped: {0}")]
    RecordDropped(#[from] Rejection),

    /// Anything not covered by the other kinds
    #[error("unknown error: {0}")]
    UnknownError(String),

    /// Miscellaneous file system operation failed
    #[error("{0}: {1}")]
    Io(&'static str, #[source] io::Error),

    /// The stream has been closed
    #[error("log stream {0} is closed")]
    StreamClosed(String),

    /// Stream names must be usable as file name prefixes
    #[error("invalid log stream name: {0:?}")]
    InvalidStreamName(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification of errors, as reported to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`Error::FileNotFound`]
    FileNotFound,
    /// See [`Error::FileNotWritable`]
    FileNotWritable,
    /// See [`Error::FileWritingFailed`]
    FileWritingFailed,
    /// See [`Error::CatalogueNotFound`]
    CatalogueNotFound,
    /// See [`Error::CatalogueCreationFailed`]
    CatalogueCreationFailed,
    /// See [`Error::RetryLimitExceeded`]
    RetryLimitExceeded,
    /// Everything else
    UnknownError,
}

impl Error {
    /// Classify this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileNotFound { .. } => ErrorKind::FileNotFound,
            Self::FileNotWritable { .. } => ErrorKind::FileNotWritable,
            Self::FileWritingFailed { .. } => ErrorKind::FileWritingFailed,
            Self::CatalogueNotFound { .. } => ErrorKind::CatalogueNotFound,
            Self::CatalogueCreationFailed { .. } => ErrorKind::CatalogueCreationFailed,
            Self::RetryLimitExceeded { .. } => ErrorKind::RetryLimitExceeded,
            Self::Io(_, e) | Self::FileUnreadable { source: e, .. } => match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                io::ErrorKind::PermissionDenied => ErrorKind::FileNotWritable,
                _ => ErrorKind::UnknownError,
            },
            Self::UnknownError(_)
            | Self::PartialRecord { .. }
            | Self::RecordDropped(_)
            | Self::StreamClosed(_)
            | Self::InvalidStreamName(_)
            | Self::Configuration(_) => ErrorKind::UnknownError,
        }
    }
}

/// A failure surfaced on the operator-visible error channel
#[derive(Debug, Clone)]
pub struct ErrorReport {
    /// Stream the failure belongs to
    pub stream: String,
    /// What went wrong
    pub error: Arc<Error>,
    /// When it was observed
    pub at: DateTime<Utc>,
}

impl ErrorReport {
    pub(crate) fn new(stream: impl Into<String>, error: impl Into<Arc<Error>>) -> Self {
        Self {
            stream: stream.into(),
            error: error.into(),
            at: Utc::now(),
        }
    }

    /// Classification of the reported error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}
