//! Error types for the snapshot engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid snapshot name: {0}")]
    InvalidSnapshotName(String),

    #[error("Incomplete snapshot: {0}")]
    IncompleteSnapshot(String),

    #[error("Unsupported snapshot version: {0}")]
    UnsupportedVersion(String),

    #[error("Corrupted path index: {0}")]
    CorruptedIndex(String),

    #[error("Damaged snapshot metadata: {0}")]
    DamagedMetadata(String),

    #[error("Rebase forbidden: {0}")]
    RebaseForbidden(String),

    #[error("File not found in snapshot {snapshot}: {path}")]
    FileNotFoundInSnapshot { path: String, snapshot: String },

    #[error("Archive tool failed (status {status:?}): {stderr}")]
    ArchiveToolFailure { status: Option<i32>, stderr: String },

    #[error("Unsupported downgrade: {0}")]
    UnsupportedDowngrade(String),

    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    #[error("Snapshot already committed: {0}")]
    AlreadyCommitted(String),

    #[error("Invalid split size: {0}")]
    InvalidSplitSize(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
