//! Backing store for resource content.

use std::fmt;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Size and modification time of a backing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// Length in bytes.
    pub len: u64,
    /// Last modification time, if the platform reports one.
    pub modified: Option<SystemTime>,
}

/// Reads resource bytes from already sandbox-resolved paths.
pub trait ContentSource: Send + Sync + fmt::Debug {
    /// Returns the file's size and modification time.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be inspected.
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata>;

    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// The local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

impl ContentSource for FsSource {
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(FileMetadata {
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }
}
