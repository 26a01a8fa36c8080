//! Snapshot Engine Library
//!
//! Storage engine for chains of full and incremental tar snapshots.

pub mod archiver;
pub mod config;
pub mod fs;
pub mod index;
pub mod manager;
pub mod snapshot;
pub mod snar;
pub mod upgrade;
pub mod utils;

#[cfg(test)]
mod testutil;

// Re-export commonly used types
pub use config::Config;
pub use manager::{ListFilter, PurgePolicy, SnapshotManager};
pub use snapshot::Snapshot;
pub use upgrade::UpgradeManager;
pub use utils::errors::{EngineError, Result};
