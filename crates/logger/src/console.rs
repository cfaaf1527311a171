//! Console logger for development

use crate::{Level, Logger, Record, encode};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[cfg(feature = "color")]
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Logger that writes encoded records to stdout
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    /// Minimum log level
    min_level: Level,
    /// Lock for stdout (to prevent interleaving)
    #[cfg(not(feature = "color"))]
    stdout: Arc<Mutex<std::io::Stdout>>,
    #[cfg(feature = "color")]
    stdout: Arc<Mutex<StandardStream>>,
}

impl ConsoleLogger {
    /// Create a new console logger
    pub fn new() -> Self {
        Self {
            min_level: Level::Debug,
            #[cfg(not(feature = "color"))]
            stdout: Arc::new(Mutex::new(std::io::stdout())),
            #[cfg(feature = "color")]
            stdout: Arc::new(Mutex::new(StandardStream::stdout(ColorChoice::Auto))),
        }
    }

    /// Create with a specific minimum level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, record: Record) {
        if !self.is_enabled(record.level) {
            return;
        }

        let line = encode(&record);

        // Write with lock
        if let Ok(mut stdout) = self.stdout.lock() {
            #[cfg(feature = "color")]
            {
                let level_color = match record.level {
                    Level::Fatal => Color::Red,
                    Level::Error => Color::Magenta,
                    Level::Warning => Color::Yellow,
                    Level::Info => Color::Blue,
                    Level::Debug => Color::Cyan,
                    Level::None => Color::White,
                };

                // Only the level tag is colored; the rest is the plain encoding
                let tag_len = record.level.as_str().len() + 2;
                let _ = stdout.set_color(ColorSpec::new().set_fg(Some(level_color)).set_bold(true));
                let _ = stdout.write_all(line[..tag_len].as_bytes());
                let _ = stdout.reset();
                let _ = stdout.write_all(line[tag_len..].as_bytes());
            }

            #[cfg(not(feature = "color"))]
            {
                let _ = stdout.write_all(line.as_bytes());
            }

            let _ = stdout.flush();
        }
    }

    fn flush(&self) {
        if let Ok(mut stdout) = self.stdout.lock() {
            let _ = stdout.flush();
        }
    }

    #[inline]
    fn is_enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }
}
