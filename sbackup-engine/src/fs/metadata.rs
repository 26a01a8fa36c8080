//! On-disk inspection of backed-up paths.
//!
//! Used when incremental state has to be rebuilt from the live filesystem:
//! the kind of each entry and the identity (device, inode, mtime) of each
//! directory.

use std::fs;
use std::path::Path;

/// Metadata subset recorded in incremental dump records
#[derive(Debug, Clone)]
pub struct FileMetadata {
    /// Last modified time (seconds since Unix epoch)
    pub mtime_secs: i64,

    /// Sub-second part of the modification time
    pub mtime_nanos: i64,

    /// Device the file lives on
    pub dev: u64,

    /// Inode number
    pub ino: u64,

    /// Is this a directory?
    pub is_dir: bool,
}

impl FileMetadata {
    /// Extract metadata from a path without following a final symlink.
    #[cfg(unix)]
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let metadata = fs::symlink_metadata(path)?;

        Ok(Self {
            mtime_secs: metadata.mtime(),
            mtime_nanos: metadata.mtime_nsec(),
            dev: metadata.dev(),
            ino: metadata.ino(),
            is_dir: metadata.is_dir(),
        })
    }

    #[cfg(not(unix))]
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::symlink_metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default();

        // Device and inode numbers are not exposed on this platform
        Ok(Self {
            mtime_secs: mtime.as_secs() as i64,
            mtime_nanos: mtime.subsec_nanos() as i64,
            dev: 0,
            ino: 0,
            is_dir: metadata.is_dir(),
        })
    }

    /// Metadata if the path still exists, `None` otherwise.
    pub fn stat(path: &Path) -> Option<Self> {
        Self::from_path(path).ok()
    }
}
