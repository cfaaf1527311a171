//! File output against the in-memory reference encoding

use chrono::{TimeZone, Utc};
use proven_logger::test_support::CaptureLogger;
use proven_logger::{Level, Logger, Record, call_site};
use proven_logger_file::{FileLoggerConfig, FileSink, LogFileManager, Sink, scan_records};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_file_matches_reference_encoding() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileLoggerConfig::builder()
        .root_dir(temp_dir.path())
        .build()
        .unwrap();
    let manager = LogFileManager::new(config).unwrap();
    let handle = manager.open_stream("app").unwrap();

    let file: Box<dyn Logger> = Box::new(Sink::from(FileSink::new(handle.clone())));
    let capture = CaptureLogger::new();

    let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
    let records = [
        Record::new(Level::Info, "plain").with_timestamp(at),
        Record::new(Level::Error, "with\ncall site")
            .with_timestamp(at)
            .with_call_site(call_site!()),
        Record::new(Level::Warning, "carriage\r\nreturn").with_timestamp(at),
        Record::new(Level::Fatal, "ünïcödé").with_timestamp(at),
    ];

    for record in &records {
        file.log(record.clone());
        capture.log(record.clone());
    }
    file.flush();

    let bytes = fs::read(handle.active_path()).unwrap();
    assert_eq!(String::from_utf8(bytes.clone()).unwrap(), capture.logs());

    // Embedded line breaks never add record boundaries
    let scan = scan_records(&bytes);
    assert_eq!(scan.records, records.len());
    assert!(scan.is_complete());
}
