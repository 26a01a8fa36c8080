//! A single backup point and its on-disk artifacts.
//!
//! Layout of a current (1.5) snapshot directory:
//!
//! | Artifact | Content |
//! |---|---|
//! | `ver` | version string, written last; its presence marks a committed snapshot |
//! | `base` | parent snapshot name (incremental only) |
//! | `format` | compression name and split size |
//! | `excludes` | serialized exclude settings |
//! | `packages` | installed package listing |
//! | `includes.list` / `excludes.list` | newline-separated absolute paths |
//! | `files.snar` | tar incremental state |
//! | `files.tar[.gz\|.bz2]` | the archive |

pub mod format;
pub mod legacy;
pub mod name;

pub use format::{Compression, FormatDescriptor, Version};
pub use name::{SnapshotKind, SnapshotName};

use crate::archiver::{Archiver, CreateRequest};
use crate::fs::walker;
use crate::index::PathIndex;
use crate::snar;
use crate::utils::errors::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const VERSION_FILE: &str = "ver";
pub const BASE_FILE: &str = "base";
pub const FORMAT_FILE: &str = "format";
pub const EXCLUDES_FILE: &str = "excludes";
pub const PACKAGES_FILE: &str = "packages";
pub const INCLUDES_LIST: &str = "includes.list";
pub const EXCLUDES_LIST: &str = "excludes.list";
pub const SNAR_FILE: &str = "files.snar";
pub const SNAR_SCRATCH: &str = "files.snar.tmp";
/// Archive name used by gzip snapshots up to version 1.4.
pub const LEGACY_ARCHIVE: &str = "files.tgz";

/// Index properties of included and excluded paths.
pub const INCLUDED: &str = "1";
pub const EXCLUDED: &str = "0";

#[derive(Debug, Clone)]
pub struct Snapshot {
    name: SnapshotName,
    path: PathBuf,
    version: Option<Version>,
    format: FormatDescriptor,
    base: Option<SnapshotName>,
    excludes: Vec<u8>,
    packages: Option<String>,
    include_index: Option<PathIndex>,
    exclude_index: Option<PathIndex>,
}

/// Serializable view used for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotSummary {
    pub name: String,
    pub date: NaiveDateTime,
    pub kind: SnapshotKind,
    pub base: Option<String>,
    pub version: Option<Version>,
    pub format: Compression,
    pub split_size: u64,
}

fn name_from_path(path: &Path) -> Result<SnapshotName> {
    let segment = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::InvalidSnapshotName(path.display().to_string()))?;
    SnapshotName::parse(segment)
}

/// Trimmed content of a small metadata file, `None` if it does not exist.
pub(crate) fn read_trimmed(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content.trim().to_string())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Remove the `ver` marker so the directory reads as incomplete until rewritten.
pub(crate) fn clear_version_marker(dir: &Path) -> Result<()> {
    match fs::remove_file(dir.join(VERSION_FILE)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

pub(crate) fn write_version_marker(dir: &Path, version: Version) -> Result<()> {
    fs::write(dir.join(VERSION_FILE), version.as_str())?;
    Ok(())
}

/// One path per line, newline-terminated.
pub(crate) fn render_list<I: IntoIterator<Item = String>>(paths: I) -> String {
    let mut out = String::new();
    for path in paths {
        out.push_str(&path);
        out.push('\n');
    }
    out
}

impl Snapshot {
    fn empty(name: SnapshotName, path: PathBuf) -> Self {
        Self {
            name,
            path,
            version: None,
            format: FormatDescriptor::default(),
            base: None,
            excludes: Vec::new(),
            packages: None,
            include_index: Some(PathIndex::new()),
            exclude_index: Some(PathIndex::new()),
        }
    }

    /// Load the snapshot at `path`, or create an empty uncommitted one if the
    /// directory does not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_dir() {
            return Self::open(path);
        }

        let name = name_from_path(&path)?;
        fs::create_dir_all(&path)?;
        debug!("Created snapshot directory {}", path.display());
        Ok(Self::empty(name, path))
    }

    /// Create a fresh snapshot named after `at` inside `target_dir`.
    pub fn create_in(
        target_dir: &Path,
        host: &str,
        kind: SnapshotKind,
        at: NaiveDateTime,
    ) -> Result<Self> {
        let name = SnapshotName::generate(at, host, kind)?;
        Self::new(target_dir.join(name.as_str()))
    }

    /// Load a committed snapshot. Fails when the `ver` marker is missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let name = name_from_path(&path)?;

        let version: Version = read_trimmed(&path.join(VERSION_FILE))?
            .ok_or_else(|| {
                EngineError::IncompleteSnapshot(format!("{name}: missing {VERSION_FILE} marker"))
            })?
            .parse()?;

        let base = read_trimmed(&path.join(BASE_FILE))?
            .filter(|b| !b.is_empty())
            .map(|b| SnapshotName::parse(&b))
            .transpose()?;

        let format = match read_trimmed(&path.join(FORMAT_FILE))? {
            Some(text) => FormatDescriptor::parse(&text)?,
            None => FormatDescriptor::default(),
        };

        let snapshot = Self {
            name,
            path,
            version: Some(version),
            format,
            base,
            excludes: Vec::new(),
            packages: None,
            include_index: None,
            exclude_index: None,
        };
        snapshot.check_base_shape()?;
        Ok(snapshot)
    }

    pub fn name(&self) -> &SnapshotName {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding this snapshot and its siblings.
    pub fn target_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn version(&self) -> Option<Version> {
        self.version
    }

    pub fn is_committed(&self) -> bool {
        self.version.is_some()
    }

    pub fn kind(&self) -> SnapshotKind {
        self.name.kind()
    }

    pub fn is_full(&self) -> bool {
        self.kind() == SnapshotKind::Full
    }

    pub fn base(&self) -> Option<&SnapshotName> {
        self.base.as_ref()
    }

    pub fn date(&self) -> NaiveDateTime {
        self.name.date()
    }

    pub fn compression(&self) -> Compression {
        self.format.compression
    }

    pub fn split_size(&self) -> u64 {
        self.format.split_size
    }

    /// Point at a new directory; the name is re-derived and validated.
    pub fn set_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.name = name_from_path(&path)?;
        self.path = path;
        Ok(())
    }

    pub fn set_base(&mut self, base: &str) -> Result<()> {
        self.base = Some(SnapshotName::parse(base)?);
        Ok(())
    }

    pub fn clear_base(&mut self) {
        self.base = None;
    }

    pub fn set_compression(&mut self, compression: Compression) {
        self.format.compression = compression;
    }

    /// Volume size in KiB; 0 disables splitting.
    pub fn set_split_size(&mut self, split_size: u64) {
        self.format.split_size = split_size;
    }

    pub fn set_excludes(&mut self, excludes: impl Into<Vec<u8>>) {
        self.excludes = excludes.into();
    }

    pub fn set_packages(&mut self, packages: impl Into<String>) {
        self.packages = Some(packages.into());
    }

    /// Package listing, read from disk for committed snapshots.
    pub fn packages(&self) -> Result<Option<String>> {
        if self.packages.is_some() {
            return Ok(self.packages.clone());
        }
        match fs::read_to_string(self.path.join(PACKAGES_FILE)) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn ensure_uncommitted(&self) -> Result<()> {
        if self.is_committed() {
            return Err(EngineError::AlreadyCommitted(self.name.to_string()));
        }
        Ok(())
    }

    pub fn add_include(&mut self, path: &str) -> Result<()> {
        self.ensure_uncommitted()?;
        self.include_index
            .get_or_insert_with(PathIndex::new)
            .set(path, INCLUDED);
        Ok(())
    }

    pub fn add_exclude(&mut self, path: &str) -> Result<()> {
        self.ensure_uncommitted()?;
        self.exclude_index
            .get_or_insert_with(PathIndex::new)
            .set(path, EXCLUDED);
        Ok(())
    }

    fn load_indexes(&mut self) -> Result<()> {
        if self.include_index.is_some() && self.exclude_index.is_some() {
            return Ok(());
        }

        let (included, excluded) = match self.version {
            None => (PathIndex::new(), PathIndex::new()),
            Some(Version::V1_5) => (
                self.read_list(INCLUDES_LIST, INCLUDED)?,
                self.read_list(EXCLUDES_LIST, EXCLUDED)?,
            ),
            Some(version) => legacy::split_index(&legacy::read_index(&self.path, version)?),
        };
        self.include_index = Some(included);
        self.exclude_index = Some(excluded);
        Ok(())
    }

    fn read_list(&self, file: &str, properties: &str) -> Result<PathIndex> {
        let path = self.path.join(file);
        let text = fs::read_to_string(&path).map_err(|e| {
            EngineError::IncompleteSnapshot(format!("{}: {e}", path.display()))
        })?;
        PathIndex::parse_list(&text, properties)
    }

    pub fn include_index(&mut self) -> Result<&PathIndex> {
        self.load_indexes()?;
        Ok(self.include_index.get_or_insert_with(PathIndex::new))
    }

    pub fn exclude_index(&mut self) -> Result<&PathIndex> {
        self.load_indexes()?;
        Ok(self.exclude_index.get_or_insert_with(PathIndex::new))
    }

    /// Path of the archive file. Gzip snapshots from 1.4 and earlier may still use `files.tgz`.
    pub fn archive(&self) -> Result<PathBuf> {
        let archive = self.path.join(self.format.compression.archive_name());
        if archive.is_file() {
            return Ok(archive);
        }

        let legacy_gzip = self.format.compression == Compression::Gzip
            && self.version.is_some_and(|v| v <= Version::V1_4);
        if legacy_gzip {
            let legacy = self.path.join(LEGACY_ARCHIVE);
            if legacy.is_file() {
                return Ok(legacy);
            }
        }

        Err(EngineError::IncompleteSnapshot(format!(
            "{}: no {} archive",
            self.name, self.format.compression
        )))
    }

    /// Index of what the archive holds, built from `files.snar`. Each entry
    /// carries its dumpdir control code; scanned directories without an
    /// entry in their parent appear as pure ancestors.
    pub fn contents(&self) -> Result<PathIndex> {
        let path = self.path.join(SNAR_FILE);
        if !path.is_file() {
            return Err(EngineError::IncompleteSnapshot(format!(
                "{}: missing {SNAR_FILE}",
                self.name
            )));
        }

        let mut index = PathIndex::new();
        for record in snar::parse(&path)? {
            let record = record?;
            index.set_node(&record.display_name(), None, None);
            for entry in &record.entries {
                index.set(&record.child_path(entry), entry.code.as_str());
            }
        }
        Ok(index)
    }

    /// Bytes used by every artifact of this snapshot.
    pub fn disk_usage(&self) -> Result<u64> {
        Ok(walker::calculate_total_size(&self.path)?)
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            name: self.name.to_string(),
            date: self.date(),
            kind: self.kind(),
            base: self.base.as_ref().map(|b| b.to_string()),
            version: self.version,
            format: self.format.compression,
            split_size: self.format.split_size,
        }
    }

    /// Full snapshots never have a base; incremental ones always do.
    fn check_base_shape(&self) -> Result<()> {
        match (self.kind(), &self.base) {
            (SnapshotKind::Full, Some(base)) => Err(EngineError::DamagedMetadata(format!(
                "full snapshot {} has base {base}",
                self.name
            ))),
            (SnapshotKind::Incremental, None) => Err(EngineError::IncompleteSnapshot(format!(
                "incremental snapshot {} has no base",
                self.name
            ))),
            _ => Ok(()),
        }
    }

    /// Directory of the base snapshot, which must be older and committed.
    fn committed_base_dir(&self) -> Result<Option<PathBuf>> {
        self.check_base_shape()?;
        let Some(base) = &self.base else {
            return Ok(None);
        };

        if base >= &self.name {
            return Err(EngineError::DamagedMetadata(format!(
                "base {base} is not older than {}",
                self.name
            )));
        }
        let dir = self.target_dir().join(base.as_str());
        if !dir.join(VERSION_FILE).is_file() {
            return Err(EngineError::IncompleteSnapshot(format!(
                "base {base} of {} is not a committed snapshot",
                self.name
            )));
        }
        Ok(Some(dir))
    }

    /// Write or remove the `base` file to match the in-memory base.
    pub(crate) fn persist_base(&self) -> Result<()> {
        let path = self.path.join(BASE_FILE);
        match &self.base {
            Some(base) => fs::write(path, base.as_str())?,
            None => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }

    fn remove_scratch(&self) -> Result<()> {
        let scratch = self.path.join(SNAR_SCRATCH);
        if scratch.exists() {
            fs::remove_file(scratch)?;
        }
        Ok(())
    }

    /// Write every artifact, run the archiver, and write the `ver` marker last.
    pub fn commit(&mut self, archiver: &dyn Archiver) -> Result<()> {
        self.ensure_uncommitted()?;
        let base_dir = self.committed_base_dir()?;
        self.load_indexes()?;

        info!("Committing snapshot {}", self.name);

        self.persist_base()?;

        if self.format.split_size > 0 && self.format.compression != Compression::None {
            warn!(
                "Split archives cannot be compressed, writing {} uncompressed",
                self.name
            );
            self.format.compression = Compression::None;
        }
        fs::write(self.path.join(FORMAT_FILE), self.format.render())?;
        fs::write(self.path.join(EXCLUDES_FILE), &self.excludes)?;
        if let Some(packages) = &self.packages {
            fs::write(self.path.join(PACKAGES_FILE), packages)?;
        }

        let includes = self
            .include_index
            .as_ref()
            .map(|index| render_list(index.iter_effective_files_not_nested(None)))
            .unwrap_or_default();
        let excludes = self
            .exclude_index
            .as_ref()
            .map(|index| render_list(index.iter_effective_files()))
            .unwrap_or_default();
        fs::write(self.path.join(INCLUDES_LIST), includes)?;
        fs::write(self.path.join(EXCLUDES_LIST), excludes)?;

        let scratch = self.path.join(SNAR_SCRATCH);
        if let Some(base_dir) = &base_dir {
            let base_snar = base_dir.join(SNAR_FILE);
            if !base_snar.is_file() {
                return Err(EngineError::IncompleteSnapshot(format!(
                    "{}: missing {SNAR_FILE}",
                    base_dir.display()
                )));
            }
            fs::copy(&base_snar, &scratch)?;
        }

        let request = CreateRequest {
            archive: self.path.join(self.format.compression.archive_name()),
            compression: self.format.compression,
            directory: PathBuf::from("/"),
            files_from: self.path.join(INCLUDES_LIST),
            exclude_from: Some(self.path.join(EXCLUDES_LIST)),
            listed_incremental: Some(scratch.clone()),
            split_size: self.format.split_size,
        };
        if let Err(e) = archiver.create(&request) {
            self.remove_scratch()?;
            return Err(e);
        }

        fs::rename(&scratch, self.path.join(SNAR_FILE))?;
        self.remove_scratch()?;

        write_version_marker(&self.path, Version::CURRENT)?;
        self.version = Some(Version::CURRENT);

        info!("Snapshot {} committed", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{write_snapshot, FakeArchiver};
    use crate::snar::DumpdirCode;
    use tempfile::TempDir;

    const FULL: &str = "2024-01-01_10.00.00.000000.host.ful";
    const INC: &str = "2024-01-02_10.00.00.000000.host.inc";

    #[test]
    fn test_new_creates_uncommitted_directory() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join(FULL)).unwrap();
        assert!(snapshot.path().is_dir());
        assert!(!snapshot.is_committed());
        assert!(snapshot.is_full());
    }

    #[test]
    fn test_invalid_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = Snapshot::new(dir.path().join("backup-of-today")).unwrap_err();
        assert!(matches!(err, EngineError::InvalidSnapshotName(_)));
        assert!(!dir.path().join("backup-of-today").exists());
    }

    #[test]
    fn test_existing_directory_without_marker_is_incomplete() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(FULL)).unwrap();
        let err = Snapshot::new(dir.path().join(FULL)).unwrap_err();
        assert!(matches!(err, EngineError::IncompleteSnapshot(_)));
    }

    #[test]
    fn test_commit_full_snapshot() {
        let dir = TempDir::new().unwrap();
        let archiver = FakeArchiver::default();

        let mut snapshot = Snapshot::new(dir.path().join(FULL)).unwrap();
        snapshot.add_include("/a").unwrap();
        snapshot.add_include("/a/b").unwrap();
        snapshot.add_exclude("/a/b/cache").unwrap();
        snapshot.set_packages("bash\t5.2\n");
        snapshot.commit(&archiver).unwrap();

        assert_eq!(snapshot.version(), Some(Version::V1_5));
        assert_eq!(
            snapshot.archive().unwrap(),
            dir.path().join(FULL).join("files.tar.gz")
        );
        assert_eq!(
            fs::read_to_string(snapshot.path().join(INCLUDES_LIST)).unwrap(),
            "/a\n"
        );
        assert_eq!(
            fs::read_to_string(snapshot.path().join(EXCLUDES_LIST)).unwrap(),
            "/a/b/cache\n"
        );
        assert!(snapshot.path().join(SNAR_FILE).is_file());
        assert!(!snapshot.path().join(SNAR_SCRATCH).exists());
        assert!(!snapshot.path().join(BASE_FILE).exists());

        // The archiver ran before the marker existed.
        assert_eq!(archiver.marker_seen_during_create(), vec![false]);

        let reopened = Snapshot::open(snapshot.path()).unwrap();
        assert_eq!(reopened.packages().unwrap().as_deref(), Some("bash\t5.2\n"));
        assert!(matches!(
            snapshot.add_include("/late"),
            Err(EngineError::AlreadyCommitted(_))
        ));
    }

    #[test]
    fn test_commit_incremental_copies_base_state() {
        let dir = TempDir::new().unwrap();
        write_snapshot(dir.path(), FULL, None, &[("/data/a.txt", DumpdirCode::Included)]);

        let mut snapshot = Snapshot::new(dir.path().join(INC)).unwrap();
        snapshot.set_base(FULL).unwrap();
        snapshot.add_include("/data").unwrap();
        snapshot.commit(&FakeArchiver::default()).unwrap();

        assert_eq!(
            fs::read_to_string(snapshot.path().join(BASE_FILE)).unwrap(),
            FULL
        );
        let reopened = Snapshot::open(snapshot.path()).unwrap();
        assert_eq!(reopened.base().map(|b| b.as_str()), Some(FULL));
    }

    #[test]
    fn test_commit_rejects_wrong_base_shape() {
        let dir = TempDir::new().unwrap();
        let archiver = FakeArchiver::default();

        let mut inc = Snapshot::new(dir.path().join(INC)).unwrap();
        assert!(matches!(
            inc.commit(&archiver),
            Err(EngineError::IncompleteSnapshot(_))
        ));

        let mut full = Snapshot::new(dir.path().join(FULL)).unwrap();
        full.set_base(INC).unwrap();
        assert!(matches!(
            full.commit(&archiver),
            Err(EngineError::DamagedMetadata(_))
        ));
        assert!(!full.path().join(VERSION_FILE).exists());
    }

    #[test]
    fn test_failed_archiver_leaves_snapshot_incomplete() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = Snapshot::new(dir.path().join(FULL)).unwrap();
        snapshot.add_include("/etc").unwrap();

        let err = snapshot.commit(&FakeArchiver::failing()).unwrap_err();
        assert!(matches!(err, EngineError::ArchiveToolFailure { .. }));
        assert!(!snapshot.path().join(VERSION_FILE).exists());
        assert!(!snapshot.path().join(SNAR_SCRATCH).exists());
        assert!(Snapshot::open(snapshot.path()).is_err());
    }

    #[test]
    fn test_split_archive_drops_compression() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = Snapshot::new(dir.path().join(FULL)).unwrap();
        snapshot.set_split_size(1024);
        snapshot.add_include("/etc").unwrap();
        snapshot.commit(&FakeArchiver::default()).unwrap();

        assert_eq!(snapshot.compression(), Compression::None);
        let desc = fs::read_to_string(snapshot.path().join(FORMAT_FILE)).unwrap();
        assert_eq!(desc, "none\n1024\n");
        assert!(snapshot.archive().unwrap().ends_with("files.tar"));
    }

    #[test]
    fn test_legacy_gzip_archive_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(FULL);
        fs::create_dir(&path).unwrap();
        fs::write(path.join(VERSION_FILE), "1.4").unwrap();
        fs::write(path.join(LEGACY_ARCHIVE), "").unwrap();
        let snapshot = Snapshot::open(&path).unwrap();
        assert!(snapshot.archive().unwrap().ends_with(LEGACY_ARCHIVE));

        fs::write(path.join(VERSION_FILE), "1.5").unwrap();
        let snapshot = Snapshot::open(&path).unwrap();
        assert!(matches!(
            snapshot.archive(),
            Err(EngineError::IncompleteSnapshot(_))
        ));
    }

    #[test]
    fn test_set_path_rederives_name() {
        let dir = TempDir::new().unwrap();
        let mut snapshot = Snapshot::new(dir.path().join(FULL)).unwrap();
        snapshot.set_path(dir.path().join(INC)).unwrap();
        assert_eq!(snapshot.name().as_str(), INC);
        assert!(!snapshot.is_full());
        assert!(snapshot.set_path(dir.path().join("junk")).is_err());
    }

    #[test]
    fn test_contents_from_snar() {
        let dir = TempDir::new().unwrap();
        let path = write_snapshot(
            dir.path(),
            FULL,
            None,
            &[
                ("/home/u/a.txt", DumpdirCode::Included),
                ("/home/u/old.txt", DumpdirCode::NotDumped),
            ],
        );
        let snapshot = Snapshot::open(path).unwrap();
        let contents = snapshot.contents().unwrap();
        assert_eq!(contents.properties("/home/u/a.txt"), Some("Y"));
        assert_eq!(contents.properties("/home/u/old.txt"), Some("N"));
        assert!(contents.has_path("/home/u"));
        assert!(snapshot.disk_usage().unwrap() > 0);
    }

    #[test]
    fn test_create_in_generates_name() {
        let dir = TempDir::new().unwrap();
        let at = chrono::NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_micro_opt(8, 9, 10, 11)
            .unwrap();
        let snapshot =
            Snapshot::create_in(dir.path(), "box", SnapshotKind::Incremental, at).unwrap();
        assert_eq!(snapshot.name().as_str(), "2024-03-05_08.09.10.000011.box.inc");
        assert_eq!(snapshot.summary().kind, SnapshotKind::Incremental);
    }
}
