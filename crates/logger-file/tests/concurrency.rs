//! Many producers, one stream

use proven_logger::{Level, Record};
use proven_logger_file::{FileLoggerConfig, LogFileManager, RotationPolicy, scan_records};
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const THREADS: usize = 8;
const PER_THREAD: usize = 2_000;

fn read_stream(config: &FileLoggerConfig, stream: &str) -> Vec<String> {
    let policy = RotationPolicy::from_config(config, stream);
    let mut texts = Vec::new();

    for file in policy.list_files().unwrap() {
        let bytes = fs::read(&file.path).unwrap();
        assert!(scan_records(&bytes).is_complete());

        for line in String::from_utf8(bytes).unwrap().lines() {
            let (_, text) = line.rsplit_once("] ").unwrap();
            texts.push(text.to_string());
        }
    }
    texts
}

#[test]
fn test_concurrent_producers_lose_nothing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let temp_dir = TempDir::new().unwrap();
    let config = FileLoggerConfig::builder()
        .root_dir(temp_dir.path())
        .file_size_limit(64 * 1024)
        .max_buffers(4096)
        .build()
        .unwrap();
    let manager = Arc::new(LogFileManager::new(config.clone()).unwrap());
    let handle = manager.open_stream("load").unwrap();

    let producers: Vec<_> = (0..THREADS)
        .map(|t| {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    handle
                        .log(Record::new(Level::Info, format!("t{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    manager.close_stream(&handle).unwrap();

    let stats = handle.stats();
    assert_eq!(stats.lost_records, 0);
    assert_eq!(stats.records_written, (THREADS * PER_THREAD) as u64);
    assert!(stats.rotations > 0);
    assert!(handle.pool_stats().is_balanced());

    let texts = read_stream(&config, "load");
    assert_eq!(texts.len(), THREADS * PER_THREAD);

    // Every record exactly once, each thread's records in submission order
    let mut next_expected: HashMap<usize, usize> = HashMap::new();
    for text in &texts {
        let (thread, seq) = text[1..].split_once('-').unwrap();
        let thread: usize = thread.parse().unwrap();
        let seq: usize = seq.parse().unwrap();

        let expected = next_expected.entry(thread).or_default();
        assert_eq!(seq, *expected, "thread {thread} out of order");
        *expected += 1;
    }
    assert_eq!(next_expected.len(), THREADS);
    assert!(next_expected.values().all(|&n| n == PER_THREAD));
}

#[test]
fn test_streams_are_independent() {
    let temp_dir = TempDir::new().unwrap();
    let config = FileLoggerConfig::builder()
        .root_dir(temp_dir.path())
        .build()
        .unwrap();
    let manager = LogFileManager::new(config.clone()).unwrap();

    let names = ["alpha", "alpha_beta", "gamma"];
    let handles: Vec<_> = names
        .iter()
        .map(|name| manager.open_stream(name).unwrap())
        .collect();

    thread::scope(|scope| {
        for handle in &handles {
            scope.spawn(move || {
                for i in 0..300 {
                    handle
                        .log(Record::new(Level::Info, format!("{}-{i}", handle.name())))
                        .unwrap();
                }
            });
        }
    });

    manager.shutdown().unwrap();

    for name in names {
        let texts = read_stream(&config, name);
        assert_eq!(texts.len(), 300, "stream {name}");
        assert!(texts.iter().all(|t| t.starts_with(&format!("{name}-"))));
    }
}
