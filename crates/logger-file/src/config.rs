//! Configuration for file-based logging

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default size at which a log file is rotated (2 MiB)
pub const DEFAULT_FILE_SIZE_LIMIT: u64 = 2 * 1024 * 1024;
/// Default number of files kept per stream
pub const DEFAULT_MAX_FILES: usize = 1024;
/// Default maximum record text length before truncation
pub const DEFAULT_MAX_RECORD_LEN: usize = 4096;
/// Default capacity of one in-memory buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
/// Default number of buffers a stream may allocate
pub const DEFAULT_MAX_BUFFERS: usize = 64;
/// Default number of retries for a failed buffer write
pub const DEFAULT_RETRY_LIMIT: u32 = 1;

/// Configuration for the file logger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggerConfig {
    /// Directory that holds every stream's files
    pub root_dir: PathBuf,
    /// Size at which the active file is rotated
    pub file_size_limit: u64,
    /// Files kept per stream before the oldest are deleted
    pub max_files: usize,
    /// Record text longer than this is truncated
    pub max_record_len: usize,
    /// Capacity of each in-memory buffer
    pub buffer_size: usize,
    /// Upper bound on buffers per stream; memory use is at most
    /// `max_buffers * buffer_size`
    pub max_buffers: usize,
    /// Retries for a failed buffer write before the buffer is dropped
    pub retry_limit: u32,
}

impl Default for FileLoggerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("logs"),
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            max_files: DEFAULT_MAX_FILES,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: DEFAULT_MAX_BUFFERS,
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }
}

impl FileLoggerConfig {
    /// Create a builder with default values
    pub fn builder() -> FileLoggerConfigBuilder {
        FileLoggerConfigBuilder::new()
    }

    /// Check that every limit is usable
    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("root_dir must not be empty".into()));
        }
        if self.file_size_limit == 0 {
            return Err(Error::Configuration("file_size_limit must be positive".into()));
        }
        if self.max_files == 0 {
            return Err(Error::Configuration("max_files must be positive".into()));
        }
        if self.max_record_len == 0 {
            return Err(Error::Configuration("max_record_len must be positive".into()));
        }
        if self.buffer_size == 0 {
            return Err(Error::Configuration("buffer_size must be positive".into()));
        }
        if self.max_buffers < 2 {
            return Err(Error::Configuration("max_buffers must be at least 2".into()));
        }
        Ok(())
    }
}

/// Builder for `FileLoggerConfig`
#[derive(Debug, Clone)]
pub struct FileLoggerConfigBuilder {
    config: FileLoggerConfig,
}

impl FileLoggerConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: FileLoggerConfig::default(),
        }
    }

    /// Set the root log directory
    pub fn root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = dir.into();
        self
    }

    /// Set the rotation size
    pub fn file_size_limit(mut self, bytes: u64) -> Self {
        self.config.file_size_limit = bytes;
        self
    }

    /// Set the retention limit
    pub fn max_files(mut self, count: usize) -> Self {
        self.config.max_files = count;
        self
    }

    /// Set the record truncation length
    pub fn max_record_len(mut self, bytes: usize) -> Self {
        self.config.max_record_len = bytes;
        self
    }

    /// Set the buffer capacity
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.config.buffer_size = bytes;
        self
    }

    /// Set the per-stream buffer bound
    pub fn max_buffers(mut self, count: usize) -> Self {
        self.config.max_buffers = count;
        self
    }

    /// Set the write retry budget
    pub fn retry_limit(mut self, retries: u32) -> Self {
        self.config.retry_limit = retries;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<FileLoggerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for FileLoggerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FileLoggerConfig::default();
        assert_eq!(config.file_size_limit, 2 * 1024 * 1024);
        assert_eq!(config.max_files, 1024);
        assert_eq!(config.max_record_len, 4096);
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.retry_limit, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = FileLoggerConfig::builder()
            .root_dir("/var/log/app")
            .file_size_limit(4096)
            .max_files(3)
            .buffer_size(512)
            .build()
            .unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/var/log/app"));
        assert_eq!(config.file_size_limit, 4096);
        assert_eq!(config.max_files, 3);
        assert_eq!(config.buffer_size, 512);
    }

    #[test]
    fn test_builder_rejects_bad_limits() {
        assert!(matches!(
            FileLoggerConfig::builder().max_files(0).build(),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            FileLoggerConfig::builder().max_buffers(1).build(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_serialization() {
        let config = FileLoggerConfig::default();

        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: FileLoggerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, config);

        // Missing fields fall back to defaults
        let partial: FileLoggerConfig = serde_json::from_str(r#"{"max_files": 8}"#).unwrap();
        assert_eq!(partial.max_files, 8);
        assert_eq!(partial.buffer_size, DEFAULT_BUFFER_SIZE);
    }
}
