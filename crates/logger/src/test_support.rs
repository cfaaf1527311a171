//! Test support utilities
//!
//! This module provides utilities for capturing logs during tests.
//! It's only available when the `test-support` feature is enabled.

use crate::{Level, Logger, Record, encode};
use std::sync::{Arc, Mutex};

/// A logger that captures encoded records in memory for testing
#[derive(Clone)]
pub struct CaptureLogger {
    lines: Arc<Mutex<Vec<String>>>,
    flushes: Arc<Mutex<usize>>,
    min_level: Level,
}

impl CaptureLogger {
    /// Create a new capture logger
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Mutex::new(Vec::new())),
            flushes: Arc::new(Mutex::new(0)),
            min_level: Level::None,
        }
    }

    /// Create with a specific level
    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Get all captured records, encoded, in arrival order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    /// Get all captured output as one string
    pub fn logs(&self) -> String {
        self.lines.lock().unwrap().concat()
    }

    /// Number of times `flush` was called
    pub fn flush_count(&self) -> usize {
        *self.flushes.lock().unwrap()
    }

    /// Clear captured logs
    pub fn clear(&self) {
        self.lines.lock().unwrap().clear();
    }

    /// Check if logs contain a specific string
    pub fn contains(&self, text: &str) -> bool {
        self.lines.lock().unwrap().iter().any(|line| line.contains(text))
    }
}

impl Default for CaptureLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for CaptureLogger {
    fn log(&self, record: Record) {
        if !self.is_enabled(record.level) {
            return;
        }

        if let Ok(mut lines) = self.lines.lock() {
            lines.push(encode(&record));
        }
    }

    fn flush(&self) {
        if let Ok(mut flushes) = self.flushes.lock() {
            *flushes += 1;
        }
    }

    #[inline]
    fn is_enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }
}
