//! Boundary with the external archive tool.
//!
//! The engine only describes what to archive or extract; an [`Archiver`]
//! carries it out. [`TarArchiver`] drives GNU tar.

pub mod tar;

pub use tar::TarArchiver;

use crate::snapshot::format::Compression;
use crate::utils::errors::Result;
use std::path::PathBuf;

/// Build an archive from a list of paths.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub archive: PathBuf,
    pub compression: Compression,
    /// Directory the listed paths are resolved against.
    pub directory: PathBuf,
    /// Newline-separated list of paths to archive.
    pub files_from: PathBuf,
    pub exclude_from: Option<PathBuf>,
    /// Incremental state file. Read when it exists and rewritten by the tool.
    pub listed_incremental: Option<PathBuf>,
    /// Volume size in KiB; 0 writes a single archive.
    pub split_size: u64,
}

/// Which archive members to extract, as absolute paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    All,
    Single(PathBuf),
    List(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub archive: PathBuf,
    pub compression: Compression,
    pub target_dir: PathBuf,
    pub members: Members,
    /// Keep files that would be overwritten, renamed with this suffix.
    pub backup_suffix: Option<String>,
    /// Volume size the archive was written with; 0 for a single archive.
    pub split_size: u64,
}

/// Blocking archive tool. Failures surface as `ArchiveToolFailure`.
pub trait Archiver {
    fn create(&self, request: &CreateRequest) -> Result<()>;
    fn extract(&self, request: &ExtractRequest) -> Result<()>;
}
