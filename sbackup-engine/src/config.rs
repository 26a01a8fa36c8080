//! Configuration management for the snapshot engine.
//!
//! Loads configuration from a TOML file. Every section and key is optional.

use crate::archiver::TarArchiver;
use crate::manager::PurgePolicy;
use crate::snapshot::format::Compression;
use crate::snapshot::{Snapshot, SnapshotKind};
use crate::utils::errors::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub target: TargetConfig,
    pub snapshot: SnapshotConfig,
    pub archiver: ArchiverConfig,
    pub purge: PurgeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Directory holding the snapshots
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Archive compression (none, gzip, bzip2)
    pub format: Compression,

    /// Volume size in KiB, 0 for a single archive
    pub split_size: u64,

    /// Host name embedded in new snapshot names
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverConfig {
    /// GNU tar binary
    pub tar_path: PathBuf,

    /// Script run by tar between volumes of a split archive
    pub volume_script: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PurgeConfig {
    /// Retention policy (simple, log)
    pub policy: String,

    /// Maximum age kept by the simple policy
    pub max_age_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

fn default_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/backup"),
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            format: Compression::Gzip,
            split_size: 0,
            hostname: default_hostname(),
        }
    }
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            tar_path: PathBuf::from("tar"),
            volume_script: None,
        }
    }
}

impl Default for PurgeConfig {
    fn default() -> Self {
        Self {
            policy: "log".to_string(),
            max_age_days: 30,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn archiver(&self) -> TarArchiver {
        TarArchiver::new(&self.archiver.tar_path)
            .with_volume_script(self.archiver.volume_script.clone())
    }
}

impl SnapshotConfig {
    /// Start an uncommitted snapshot taken at `at`, with the configured
    /// host name, compression and volume size.
    pub fn start(
        &self,
        target_dir: &Path,
        kind: SnapshotKind,
        at: NaiveDateTime,
    ) -> Result<Snapshot> {
        let mut snapshot = Snapshot::create_in(target_dir, &self.hostname, kind, at)?;
        snapshot.set_compression(self.format);
        snapshot.set_split_size(self.split_size);
        Ok(snapshot)
    }
}

impl PurgeConfig {
    /// Resolve the configured policy name.
    pub fn policy(&self) -> Result<PurgePolicy> {
        match self.policy.as_str() {
            "simple" => Ok(PurgePolicy::Simple {
                max_age_days: self.max_age_days,
            }),
            "log" => Ok(PurgePolicy::Log),
            other => Err(EngineError::Config(format!(
                "unknown purge policy: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::from_toml(
            r#"
            [target]
            dir = "/mnt/backups"

            [snapshot]
            format = "bzip2"
            split_size = 4096

            [purge]
            policy = "simple"
            "#,
        )
        .unwrap();

        assert_eq!(config.target.dir, PathBuf::from("/mnt/backups"));
        assert_eq!(config.snapshot.format, Compression::Bzip2);
        assert_eq!(config.snapshot.split_size, 4096);
        assert!(!config.snapshot.hostname.is_empty());
        assert_eq!(config.archiver.tar_path, PathBuf::from("tar"));
        assert_eq!(config.log.level, "info");
        assert_eq!(
            config.purge.policy().unwrap(),
            PurgePolicy::Simple { max_age_days: 30 }
        );
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Config::from_toml("[snapshot]\nformat = \"zip\"\n"),
            Err(EngineError::Config(_))
        ));

        let mut config = Config::default();
        assert_eq!(config.purge.policy().unwrap(), PurgePolicy::Log);
        config.purge.policy = "forever".to_string();
        assert!(matches!(config.purge.policy(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_start_snapshot_uses_configured_format() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::from_toml(
            r#"
            [snapshot]
            format = "bzip2"
            split_size = 2048
            hostname = "box"
            "#,
        )
        .unwrap();
        let at = chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(8, 9, 10, 11)
            .unwrap();

        let snapshot = config
            .snapshot
            .start(dir.path(), SnapshotKind::Full, at)
            .unwrap();
        assert_eq!(snapshot.name().as_str(), "2024-03-05_08.09.10.000011.box.ful");
        assert_eq!(snapshot.compression(), Compression::Bzip2);
        assert_eq!(snapshot.split_size(), 2048);
        assert!(!snapshot.is_committed());
        assert!(snapshot.path().is_dir());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Config::from_file(&dir.path().join("sbackup.toml")).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
