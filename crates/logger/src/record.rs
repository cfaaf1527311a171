//! Log record type

use crate::Level;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Where in the source a record was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CallSite {
    /// Source file
    pub file: &'static str,
    /// Line number
    pub line: u32,
    /// Enclosing function or module path (may be empty)
    pub function: &'static str,
}

impl CallSite {
    /// Create a call site
    #[must_use]
    pub const fn new(file: &'static str, line: u32, function: &'static str) -> Self {
        Self {
            file,
            line,
            function,
        }
    }
}

/// Process and thread that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Origin {
    /// OS process id
    pub pid: u32,
    /// Process-unique numeric id of the producing thread
    pub tid: u64,
}

impl Origin {
    /// Origin of the calling thread
    #[must_use]
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            tid: current_thread_id(),
        }
    }
}

/// One log entry. Immutable once handed to a sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Log level
    pub level: Level,
    /// When the record was created
    pub timestamp: DateTime<Utc>,
    /// Producing process and thread
    pub origin: Origin,
    /// Call site, for diagnostic levels
    pub call_site: Option<CallSite>,
    /// The log message
    pub text: String,
}

impl Record {
    /// Create a record stamped with the current time and thread
    pub fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: monotonic_now(),
            origin: Origin::current(),
            call_site: None,
            text: text.into(),
        }
    }

    /// Builder-style method for setting the call site
    #[inline]
    #[must_use]
    pub fn with_call_site(mut self, call_site: CallSite) -> Self {
        self.call_site = Some(call_site);
        self
    }

    /// Builder-style method for overriding the timestamp
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Cap the text at `max_len` bytes, cutting on a char boundary.
    ///
    /// Returns whether anything was removed.
    pub fn truncate(&mut self, max_len: usize) -> bool {
        if self.text.len() <= max_len {
            return false;
        }

        let mut cut = max_len;
        while !self.text.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.truncate(cut);
        true
    }
}

/// Wall-clock time that never goes backwards within this process
fn monotonic_now() -> DateTime<Utc> {
    static LAST_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

    let now = Utc::now();
    let micros = now.timestamp_micros();
    let previous = LAST_MICROS.fetch_max(micros, Ordering::AcqRel);

    if previous > micros {
        DateTime::from_timestamp_micros(previous).unwrap_or(now)
    } else {
        now
    }
}

fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }

    THREAD_ID.with(|id| *id)
}
