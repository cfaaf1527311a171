//! Single open log file

use crate::error::{Error, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Owns one open log file and counts what went into it.
///
/// Only the stream's worker thread holds a `FileWriter`.
#[derive(Debug)]
pub struct FileWriter {
    path: PathBuf,
    file: File,
    bytes_written: u64,
    size_limit: u64,
    dirty: bool,
}

impl FileWriter {
    /// Open `path` for appending, creating the parent directory and the
    /// file as needed. An existing file's size counts towards the limit.
    pub fn open(path: impl Into<PathBuf>, size_limit: u64) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| Error::CatalogueCreationFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::FileNotWritable {
                path: path.clone(),
                source,
            })?;

        let bytes_written = file
            .metadata()
            .map_err(|source| Error::FileNotWritable {
                path: path.clone(),
                source,
            })?
            .len();

        Ok(Self {
            path,
            file,
            bytes_written,
            size_limit,
            dirty: false,
        })
    }

    /// Path of the file
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the file, including any present when it was opened
    #[inline]
    #[must_use]
    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Whether the file has reached its size limit
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.bytes_written >= self.size_limit
    }

    /// Whether the file still exists at its path. Anything but a
    /// directory counts, so devices and pipes can be written to.
    #[must_use]
    pub fn is_present(&self) -> bool {
        fs::metadata(&self.path).is_ok_and(|meta| !meta.is_dir())
    }

    /// Write all of `bytes`.
    ///
    /// On failure the error carries how many bytes did land, so a caller
    /// can resume from there instead of writing them twice.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match self.file.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(Error::FileWritingFailed {
                        path: self.path.clone(),
                        written,
                        source: io::Error::from(io::ErrorKind::WriteZero),
                    });
                }
                Ok(n) => {
                    written += n;
                    self.bytes_written += n as u64;
                    self.dirty = true;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(Error::FileWritingFailed {
                        path: self.path.clone(),
                        written,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Cut the file back to `len` bytes, discarding anything after it
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.file.set_len(len).map_err(|source| Error::FileWritingFailed {
            path: self.path.clone(),
            written: 0,
            source,
        })?;
        self.bytes_written = len;
        self.dirty = true;
        Ok(())
    }

    /// Push written bytes to stable storage
    pub fn flush(&mut self) -> Result<()> {
        self.file
            .flush()
            .and_then(|()| self.file.sync_data())
            .map_err(|source| Error::FileWritingFailed {
                path: self.path.clone(),
                written: 0,
                source,
            })?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and close the file
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        if !self.dirty {
            return;
        }
        if let Err(e) = self.file.sync_data() {
            warn!("Failed to sync {} on close: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_creates_directory_and_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/deeper/app.log");

        let mut writer = FileWriter::open(&path, 1024).unwrap();
        assert!(path.exists());
        assert_eq!(writer.bytes_written(), 0);

        writer.append(b"first\n").unwrap();
        writer.flush().unwrap();
        assert_eq!(writer.bytes_written(), 6);
        assert_eq!(fs::read(&path).unwrap(), b"first\n");
    }

    #[test]
    fn test_existing_size_counts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");
        fs::write(&path, b"0123456789\n").unwrap();

        let mut writer = FileWriter::open(&path, 16).unwrap();
        assert_eq!(writer.bytes_written(), 11);
        assert!(!writer.is_full());

        writer.append(b"abcde\n").unwrap();
        assert!(writer.is_full());
        writer.close().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"0123456789\nabcde\n");
    }

    #[test]
    fn test_catalogue_creation_failure() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("not-a-dir");
        fs::write(&blocker, b"").unwrap();

        let err = FileWriter::open(blocker.join("app.log"), 1024).unwrap_err();
        assert!(matches!(err, Error::CatalogueCreationFailed { .. }));
    }

    #[test]
    fn test_detects_removed_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");

        let writer = FileWriter::open(&path, 1024).unwrap();
        assert!(writer.is_present());

        fs::remove_file(&path).unwrap();
        assert!(!writer.is_present());
    }

    #[test]
    fn test_truncate_discards_tail() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");

        let mut writer = FileWriter::open(&path, 1024).unwrap();
        writer.append(b"kept\nhalf a rec").unwrap();
        writer.truncate(5).unwrap();
        assert_eq!(writer.bytes_written(), 5);

        writer.append(b"next\n").unwrap();
        writer.close().unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"kept\nnext\n");
    }

    #[test]
    fn test_directory_in_place_is_not_present() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.log");

        let writer = FileWriter::open(&path, 1024).unwrap();
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        assert!(!writer.is_present());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let locked = temp_dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();

        // Privileged users ignore directory permissions
        if fs::write(locked.join("access-check"), b"").is_ok() {
            return;
        }

        let err = FileWriter::open(locked.join("app.log"), 1024).unwrap_err();
        assert!(matches!(err, Error::FileNotWritable { .. }));
        assert_eq!(err.kind(), crate::error::ErrorKind::FileNotWritable);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o700)).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_failure_reports_progress() {
        let mut writer = FileWriter::open("/dev/full", u64::MAX).unwrap();

        match writer.append(b"no space\n") {
            Err(Error::FileWritingFailed { written, .. }) => assert_eq!(written, 0),
            other => panic!("unexpected {other:?}"),
        }
    }
}
