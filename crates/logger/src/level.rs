//! Log severity levels

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a log record, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    /// Untagged output
    None,
    /// Diagnostic detail
    Debug,
    /// Normal operation
    Info,
    /// Something unexpected that the program recovered from
    Warning,
    /// A failed operation
    Error,
    /// A failure the program cannot continue past
    Fatal,
}

impl Level {
    /// All levels, least severe first
    pub const ALL: [Self; 6] = [
        Self::None,
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Fatal,
    ];

    /// Name used in encoded output
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warning => "Warning",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    /// Whether records at this level carry their call site
    #[inline]
    #[must_use]
    pub const fn needs_call_site(self) -> bool {
        matches!(self, Self::Debug | Self::Error | Self::Fatal)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
