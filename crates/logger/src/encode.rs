//! Text encoding of records
//!
//! Every encoded record is exactly one line:
//! `[<LEVEL>] [<timestamp>] [<pid::tid>] [<file:line function>] <text>\n`
//! Line breaks inside the text are escaped so the terminator only ever
//! appears at a record boundary.

use crate::Record;
use std::fmt::Write;

/// Byte that ends every encoded record
pub const RECORD_TERMINATOR: u8 = b'\n';

/// `chrono` format of the timestamp section
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Render a record as one newline-terminated line
#[must_use]
pub fn encode(record: &Record) -> String {
    let mut out = String::with_capacity(96 + record.text.len());

    let _ = write!(
        out,
        "[{}] [{}] [{}::{}] ",
        record.level,
        record.timestamp.format(TIMESTAMP_FORMAT),
        record.origin.pid,
        record.origin.tid,
    );

    if let Some(site) = &record.call_site {
        if site.function.is_empty() {
            let _ = write!(out, "[{}:{}] ", site.file, site.line);
        } else {
            let _ = write!(out, "[{}:{} {}] ", site.file, site.line, site.function);
        }
    }

    for c in record.text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }

    out.push(RECORD_TERMINATOR as char);
    out
}
