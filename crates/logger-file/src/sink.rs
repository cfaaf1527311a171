//! `Logger` implementations backed by a file stream

use crate::stream::StreamHandle;
use proven_logger::{ConsoleLogger, Level, Logger, Record};
use tracing::debug;

/// Writes records to one file stream
#[derive(Debug, Clone)]
pub struct FileSink {
    handle: StreamHandle,
    min_level: Level,
}

impl FileSink {
    /// Sink for the stream behind `handle`, accepting every level
    #[must_use]
    pub fn new(handle: StreamHandle) -> Self {
        Self {
            handle,
            min_level: Level::Debug,
        }
    }

    /// Drop records below `level`
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// The stream written to
    #[must_use]
    pub const fn handle(&self) -> &StreamHandle {
        &self.handle
    }
}

impl Logger for FileSink {
    fn log(&self, record: Record) {
        if !self.is_enabled(record.level) {
            return;
        }
        if let Err(e) = self.handle.log(record) {
            debug!("Record for stream {} not taken: {}", self.handle.name(), e);
        }
    }

    fn flush(&self) {
        if let Err(e) = self.handle.flush() {
            debug!("Flush of stream {} failed: {}", self.handle.name(), e);
        }
    }

    fn is_enabled(&self, level: Level) -> bool {
        level >= self.min_level && level > Level::None && self.handle.is_running()
    }
}

/// Destination chosen when logging is set up
#[derive(Debug, Clone)]
pub enum Sink {
    /// Standard output
    Console(ConsoleLogger),
    /// A rotating file stream
    File(FileSink),
}

impl From<ConsoleLogger> for Sink {
    fn from(logger: ConsoleLogger) -> Self {
        Self::Console(logger)
    }
}

impl From<FileSink> for Sink {
    fn from(sink: FileSink) -> Self {
        Self::File(sink)
    }
}

impl Logger for Sink {
    fn log(&self, record: Record) {
        match self {
            Self::Console(logger) => logger.log(record),
            Self::File(sink) => sink.log(record),
        }
    }

    fn flush(&self) {
        match self {
            Self::Console(logger) => logger.flush(),
            Self::File(sink) => sink.flush(),
        }
    }

    fn is_enabled(&self, level: Level) -> bool {
        match self {
            Self::Console(logger) => logger.is_enabled(level),
            Self::File(sink) => sink.is_enabled(level),
        }
    }
}
