//! Directory traversal for snapshot directories and extraction scratch space.

use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file (or other non-directory) found below the walk root
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Relative path from the root
    pub relative_path: PathBuf,

    /// File size in bytes
    pub size: u64,
}

impl FileInfo {
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Self> {
        let metadata = entry.metadata()?;
        let path = entry.path();
        let relative_path = path.strip_prefix(root).unwrap_or(path).to_path_buf();

        Ok(Self {
            relative_path,
            size: metadata.len(),
        })
    }
}

/// Walk a directory tree with a callback for each non-directory below `root`.
pub fn walk_directory_with_callback<F>(root: &Path, mut callback: F) -> std::io::Result<()>
where
    F: FnMut(&FileInfo),
{
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;

        if entry.file_type().is_dir() {
            continue;
        }

        callback(&FileInfo::from_entry(&entry, root)?);
    }

    Ok(())
}

/// Walk a directory tree and collect every file, sorted by path.
pub fn walk_directory(root: &Path) -> std::io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();
    walk_directory_with_callback(root, |file| files.push(file.clone()))?;
    Ok(files)
}

/// Calculate total size of all files in a directory
pub fn calculate_total_size(root: &Path) -> std::io::Result<u64> {
    let mut total_size = 0u64;

    walk_directory_with_callback(root, |file| {
        total_size += file.size;
    })?;

    Ok(total_size)
}
