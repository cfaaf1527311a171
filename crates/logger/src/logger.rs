//! Core logger trait

use crate::{CallSite, Level, Record};
use std::panic::Location;

/// A sink accepting records.
///
/// Implementations must never block the caller on disk or network I/O.
pub trait Logger: Send + Sync + 'static {
    /// Log a record
    fn log(&self, record: Record);

    /// Flush any buffered logs
    fn flush(&self);

    /// Check if a level is enabled (for fast filtering)
    #[inline]
    fn is_enabled(&self, level: Level) -> bool {
        level > Level::None
    }
}

/// Extension trait for convenient logging methods
pub trait LoggerExt: Logger {
    /// Log at `level`, attaching the caller's location for diagnostic levels
    #[track_caller]
    fn emit(&self, level: Level, msg: impl Into<String>) {
        if !self.is_enabled(level) {
            return;
        }

        let mut record = Record::new(level, msg);
        if level.needs_call_site() {
            let location = Location::caller();
            record = record.with_call_site(CallSite::new(location.file(), location.line(), ""));
        }
        self.log(record);
    }

    /// Log debug
    #[track_caller]
    fn debug(&self, msg: impl Into<String>) {
        self.emit(Level::Debug, msg);
    }

    /// Log info
    #[track_caller]
    fn info(&self, msg: impl Into<String>) {
        self.emit(Level::Info, msg);
    }

    /// Log a warning
    #[track_caller]
    fn warning(&self, msg: impl Into<String>) {
        self.emit(Level::Warning, msg);
    }

    /// Log an error
    #[track_caller]
    fn error(&self, msg: impl Into<String>) {
        self.emit(Level::Error, msg);
    }

    /// Log a fatal error
    #[track_caller]
    fn fatal(&self, msg: impl Into<String>) {
        self.emit(Level::Fatal, msg);
    }
}

// Implement for all loggers
impl<T: Logger + ?Sized> LoggerExt for T {}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn log(&self, _record: Record) {}

    fn flush(&self) {}

    #[inline]
    fn is_enabled(&self, _level: Level) -> bool {
        false
    }
}
