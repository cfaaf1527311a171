//! Record model and logging capability shared by every sink
//!
//! This crate defines what a log entry is and how it is turned into text:
//! - `Level` and `Record` describe one entry, including its call site
//! - `encode` renders a record as exactly one newline-terminated line
//! - `Logger` is the capability every sink implements
//! - `ConsoleLogger` writes encoded records to stdout

#![warn(missing_docs, unreachable_pub)]
#![forbid(unsafe_code)]

mod console;
mod encode;
mod level;
mod logger;
mod record;

#[cfg(feature = "test-support")]
pub mod test_support;

pub use console::ConsoleLogger;
pub use encode::{RECORD_TERMINATOR, TIMESTAMP_FORMAT, encode};
pub use level::Level;
pub use logger::{Logger, LoggerExt, NoOpLogger};
pub use record::{CallSite, Origin, Record};

/// Capture the call site of the macro invocation.
///
/// The function slot holds the enclosing module path, which is the
/// closest stable approximation Rust offers.
#[macro_export]
macro_rules! call_site {
    () => {
        $crate::CallSite::new(file!(), line!(), module_path!())
    };
}

/// Build a `Record` from a level and format arguments.
///
/// Diagnostic levels (see `Level::needs_call_site`) get the call site
/// attached automatically.
///
/// # Example
/// ```
/// use proven_logger::{Level, record};
///
/// let record = record!(Level::Error, "disk {} is full", "sda1");
/// assert!(record.call_site.is_some());
/// assert_eq!(record.text, "disk sda1 is full");
/// ```
#[macro_export]
macro_rules! record {
    ($level:expr, $($arg:tt)+) => {{
        let level: $crate::Level = $level;
        let record = $crate::Record::new(level, format!($($arg)+));
        if level.needs_call_site() {
            record.with_call_site($crate::call_site!())
        } else {
            record
        }
    }};
}
