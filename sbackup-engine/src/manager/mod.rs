//! Chain operations over every snapshot of one target directory.
//!
//! Listing is memoized per manager. Rebase, remove and purge change the
//! directory and drop the memoized listing when they finish.

mod purge;
mod revert;

pub use purge::{retention_bucket, PurgePolicy, RetentionBucket};

use crate::archiver::{Archiver, CreateRequest, ExtractRequest, Members, TarArchiver};
use crate::fs::raw::path_to_bytes;
use crate::snapshot::{
    clear_version_marker, write_version_marker, Snapshot, SnapshotKind, SnapshotName, Version,
    SNAR_FILE,
};
use crate::snar::{self, split_parent_bytes, DumpdirCode, DumpdirEntry, SnarRecord};
use crate::utils::errors::{EngineError, Result};
use chrono::{NaiveDate, NaiveDateTime};
use revert::{archived_members, claimed_entries};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Scratch tree and member list used while folding content into a snapshot.
const FOLD_SCRATCH: &str = "fold.tmp";
const FOLD_LIST: &str = "fold.list";
/// Merged archive and `files.snar` waiting to replace the snapshot's own.
const FOLD_STAGING: &str = "fold.out";

/// Which snapshots `list` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListFilter {
    #[default]
    All,
    /// Inclusive on both ends.
    DateRange { from: NaiveDateTime, to: NaiveDateTime },
    OnDate(NaiveDate),
}

impl ListFilter {
    fn matches(&self, snapshot: &Snapshot) -> bool {
        match self {
            ListFilter::All => true,
            ListFilter::DateRange { from, to } => {
                let date = snapshot.date();
                *from <= date && date <= *to
            }
            ListFilter::OnDate(day) => snapshot.date().date() == *day,
        }
    }
}

pub struct SnapshotManager<A: Archiver = TarArchiver> {
    target_dir: PathBuf,
    archiver: A,
    snapshots: Option<Vec<Snapshot>>,
}

impl<A: Archiver> SnapshotManager<A> {
    pub fn new(target_dir: impl Into<PathBuf>, archiver: A) -> Self {
        Self {
            target_dir: target_dir.into(),
            archiver,
            snapshots: None,
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    pub fn archiver(&self) -> &A {
        &self.archiver
    }

    /// Drop the memoized listing.
    pub fn refresh(&mut self) {
        self.snapshots = None;
    }

    /// Every valid snapshot on disk, newest first. Invalid directories are logged and skipped.
    fn scan(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.target_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match Snapshot::open(entry.path()) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping {}: {}", entry.path().display(), e),
            }
        }
        snapshots.sort_by(|a, b| b.name().cmp(a.name()));
        Ok(snapshots)
    }

    /// Snapshots matching `filter`, newest first.
    pub fn list(&mut self, filter: &ListFilter) -> Result<Vec<Snapshot>> {
        if self.snapshots.is_none() {
            let snapshots = self.scan()?;
            debug!(
                "Found {} snapshots in {}",
                snapshots.len(),
                self.target_dir.display()
            );
            self.snapshots = Some(snapshots);
        }

        Ok(self
            .snapshots
            .iter()
            .flatten()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }

    pub fn get(&mut self, name: &str) -> Result<Snapshot> {
        self.list(&ListFilter::All)?
            .into_iter()
            .find(|s| s.name().as_str() == name)
            .ok_or_else(|| EngineError::SnapshotNotFound(name.to_string()))
    }

    /// Load one snapshot straight from disk, bypassing the listing.
    fn open(&self, name: &SnapshotName) -> Result<Snapshot> {
        let path = self.target_dir.join(name.as_str());
        if !path.is_dir() {
            return Err(EngineError::SnapshotNotFound(name.to_string()));
        }
        Snapshot::open(path)
    }

    fn children_of(&self, name: &SnapshotName) -> Result<Vec<Snapshot>> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|s| s.base() == Some(name))
            .collect())
    }

    /// Point `target` at the older `new_base`, folding in the content of
    /// every snapshot skipped over.
    pub fn rebase(&mut self, target: &str, new_base: &str) -> Result<()> {
        let target = self.open(&SnapshotName::parse(target)?)?;
        let new_base = SnapshotName::parse(new_base)?;
        let result = self.rebase_snapshot(target, &new_base);
        self.refresh();
        result
    }

    /// Whether `ancestor` is reachable from `snapshot` through base pointers.
    fn has_ancestor(&self, snapshot: &Snapshot, ancestor: &SnapshotName) -> Result<bool> {
        let mut current = snapshot.clone();
        while let Some(base) = current.base().cloned() {
            if &base == ancestor {
                return Ok(true);
            }
            if &base >= current.name() {
                return Err(EngineError::DamagedMetadata(format!(
                    "{} names newer base {base}",
                    current.name()
                )));
            }
            current = self.open(&base)?;
        }
        Ok(false)
    }

    fn rebase_snapshot(&self, mut target: Snapshot, new_base: &SnapshotName) -> Result<()> {
        if target.is_full() {
            return Err(EngineError::RebaseForbidden(format!(
                "{} is a full snapshot",
                target.name()
            )));
        }
        if new_base >= target.name() {
            return Err(EngineError::RebaseForbidden(format!(
                "{new_base} is not older than {}",
                target.name()
            )));
        }
        if target.base() == Some(new_base) {
            debug!("{} is already based on {}", target.name(), new_base);
            return Ok(());
        }
        self.open(new_base)?;
        if !self.has_ancestor(&target, new_base)? {
            return Err(EngineError::RebaseForbidden(format!(
                "{new_base} is not an ancestor of {}",
                target.name()
            )));
        }
        ensure_current(&target)?;

        info!("Rebasing {} onto {}", target.name(), new_base);

        let staged = self.stage_fold(&target, Some(new_base))?;
        clear_version_marker(target.path())?;
        if let Some(staging) = &staged {
            apply_fold(&target, staging)?;
        }
        target.set_base(new_base.as_str())?;
        target.persist_base()?;
        write_version_marker(target.path(), Version::CURRENT)?;
        Ok(())
    }

    /// Delete a snapshot, re-parenting its children first.
    ///
    /// Children of an incremental snapshot are rebased onto its base.
    /// Children of a full snapshot become full snapshots themselves.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let name = SnapshotName::parse(name)?;
        let result = self.remove_snapshot(&name);
        self.refresh();
        result
    }

    fn remove_snapshot(&self, name: &SnapshotName) -> Result<()> {
        let snapshot = self.open(name)?;
        let children = self.children_of(name)?;
        info!(
            "Removing snapshot {} ({} dependent snapshots)",
            name,
            children.len()
        );

        for child in children {
            match snapshot.base() {
                Some(base) => self.rebase_snapshot(child, base)?,
                None => self.promote(child)?,
            }
        }

        fs::remove_dir_all(snapshot.path())?;
        Ok(())
    }

    /// Turn an incremental snapshot into a full one: fold in its whole
    /// ancestry, drop the base and rename the directory to `.ful`.
    fn promote(&self, mut child: Snapshot) -> Result<()> {
        ensure_current(&child)?;
        let full_name = child.name().with_kind(SnapshotKind::Full);
        let full_path = self.target_dir.join(full_name.as_str());
        if full_path.exists() {
            return Err(EngineError::RebaseForbidden(format!(
                "cannot promote {}: {full_name} already exists",
                child.name()
            )));
        }
        info!("Promoting {} to full snapshot {}", child.name(), full_name);

        let grandchildren = self.children_of(child.name())?;

        let staged = self.stage_fold(&child, None)?;
        clear_version_marker(child.path())?;
        if let Some(staging) = &staged {
            apply_fold(&child, staging)?;
        }
        child.clear_base();
        child.persist_base()?;
        fs::rename(child.path(), &full_path)?;
        write_version_marker(&full_path, Version::CURRENT)?;

        for mut grandchild in grandchildren {
            let version = grandchild.version().unwrap_or(Version::CURRENT);
            clear_version_marker(grandchild.path())?;
            grandchild.set_base(full_name.as_str())?;
            grandchild.persist_base()?;
            write_version_marker(grandchild.path(), version)?;
        }
        Ok(())
    }

    /// Resolve every ancestor layer up to `stop_at` that contributes to `target`.
    /// Oldest first; nothing on disk is touched.
    fn plan_fold(
        &self,
        target: &Snapshot,
        stop_at: Option<&SnapshotName>,
    ) -> Result<Vec<FoldLayer>> {
        let mut layers = self.collect_layers(target, "/", stop_at)?;
        layers.remove(target.path());

        let mut planned = Vec::with_capacity(layers.len());
        for (dir, claimed) in &layers {
            let snapshot = Snapshot::open(dir)?;
            planned.push(FoldLayer {
                archive: snapshot.archive()?,
                entries: claimed_entries(&snapshot, claimed)?,
                snapshot,
            });
        }
        Ok(planned)
    }

    /// Build the merged archive and `files.snar` of `target` in a staging
    /// directory. The snapshot itself is left as it was; on failure the
    /// staging directory is removed.
    fn stage_fold(
        &self,
        target: &Snapshot,
        stop_at: Option<&SnapshotName>,
    ) -> Result<Option<PathBuf>> {
        let layers = self.plan_fold(target, stop_at)?;
        if layers.is_empty() {
            debug!("Nothing to fold into {}", target.name());
            return Ok(None);
        }
        let own_archive = target.archive()?;

        let staging = target.path().join(FOLD_STAGING);
        reset_dir(&staging)?;
        let result = self
            .build_fold(target, &own_archive, &layers, &staging)
            .and_then(|()| write_merged_snar(target, &layers, &staging.join(SNAR_FILE)));
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!("Could not remove {}: {}", staging.display(), cleanup);
            }
            return Err(e);
        }
        Ok(Some(staging))
    }

    /// Extract the ancestor layers oldest first, then the target's own
    /// archive on top, and archive the merged tree into `staging`.
    fn build_fold(
        &self,
        target: &Snapshot,
        own_archive: &Path,
        layers: &[FoldLayer],
        staging: &Path,
    ) -> Result<()> {
        let scratch = target.path().join(FOLD_SCRATCH);
        reset_dir(&scratch)?;
        let result = self.merge_tree(target, own_archive, layers, &scratch, staging);
        let cleanup = fs::remove_dir_all(&scratch);
        result?;
        cleanup?;
        Ok(())
    }

    fn merge_tree(
        &self,
        target: &Snapshot,
        own_archive: &Path,
        layers: &[FoldLayer],
        scratch: &Path,
        staging: &Path,
    ) -> Result<()> {
        for layer in layers {
            let files = archived_members(&layer.entries);
            if files.is_empty() {
                continue;
            }
            debug!("Folding {} files from {}", files.len(), layer.snapshot.name());
            self.archiver.extract(&ExtractRequest {
                archive: layer.archive.clone(),
                compression: layer.snapshot.compression(),
                target_dir: scratch.to_path_buf(),
                members: Members::List(files),
                backup_suffix: None,
                split_size: layer.snapshot.split_size(),
            })?;
        }

        self.archiver.extract(&ExtractRequest {
            archive: own_archive.to_path_buf(),
            compression: target.compression(),
            target_dir: scratch.to_path_buf(),
            members: Members::All,
            backup_suffix: None,
            split_size: target.split_size(),
        })?;

        let mut top_level = Vec::new();
        for entry in fs::read_dir(scratch)? {
            top_level.push(path_to_bytes(Path::new(&entry?.file_name())));
        }
        top_level.sort();

        let list = staging.join(FOLD_LIST);
        let mut rendered = Vec::new();
        for name in top_level {
            rendered.extend_from_slice(&name);
            rendered.push(b'\n');
        }
        fs::write(&list, rendered)?;
        let created = self.archiver.create(&CreateRequest {
            archive: staging.join(target.compression().archive_name()),
            compression: target.compression(),
            directory: scratch.to_path_buf(),
            files_from: list.clone(),
            exclude_from: None,
            listed_incremental: None,
            split_size: target.split_size(),
        });
        fs::remove_file(&list)?;
        created
    }
}

/// One ancestor whose content is merged by a fold.
struct FoldLayer {
    snapshot: Snapshot,
    archive: PathBuf,
    /// Raw paths this layer still provides, with their dumpdir codes.
    entries: Vec<(Vec<u8>, DumpdirCode)>,
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Move the staged archive and `files.snar` over the target's own.
fn apply_fold(target: &Snapshot, staging: &Path) -> Result<()> {
    let archive_name = target.compression().archive_name();
    fs::rename(staging.join(archive_name), target.path().join(archive_name))?;
    fs::rename(staging.join(SNAR_FILE), target.path().join(SNAR_FILE))?;
    fs::remove_dir_all(staging)?;
    Ok(())
}

fn ensure_current(snapshot: &Snapshot) -> Result<()> {
    match snapshot.version() {
        Some(Version::CURRENT) => Ok(()),
        other => Err(EngineError::UnsupportedVersion(format!(
            "{} is at version {}, upgrade it first",
            snapshot.name(),
            other.map(|v| v.as_str()).unwrap_or("none")
        ))),
    }
}

/// Record `path` in the dumpdir of its parent, adding `D` entries for every ancestor.
fn set_entry(records: &mut BTreeMap<Vec<u8>, SnarRecord>, path: &[u8], code: DumpdirCode) {
    let (parent, name) = split_parent_bytes(path);
    if name.is_empty() {
        return;
    }

    let record = records.entry(parent.clone()).or_insert_with(|| SnarRecord {
        name: parent.clone(),
        ..Default::default()
    });
    match record.entries.iter_mut().find(|e| e.name == name) {
        Some(entry) if entry.code != DumpdirCode::Directory => entry.code = code,
        Some(_) => {}
        None => record.entries.push(DumpdirEntry::new(code, name)),
    }

    if parent != b"/" {
        set_entry(records, &parent, DumpdirCode::Directory);
    }
}

/// The target's `files.snar` with every folded path counted as its own, written to `out`.
fn write_merged_snar(target: &Snapshot, layers: &[FoldLayer], out: &Path) -> Result<()> {
    let reader = snar::parse(&target.path().join(SNAR_FILE))?;
    let header = reader.header().clone();

    let mut records = BTreeMap::new();
    for record in reader {
        let record = record?;
        records.insert(record.name.clone(), record);
    }

    for layer in layers {
        for (path, code) in &layer.entries {
            set_entry(&mut records, path, *code);
        }
    }
    for record in records.values_mut() {
        record.entries.sort_by(|a, b| a.name.cmp(&b.name));
    }

    snar::emit(
        out,
        (header.timestamp_secs, header.timestamp_nanos),
        records.values(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{BASE_FILE, VERSION_FILE};
    use crate::testutil::{write_snapshot, FakeArchiver};
    use tempfile::TempDir;

    const F: &str = "2024-01-01_10.00.00.000000.host.ful";
    const I1: &str = "2024-01-02_10.00.00.000000.host.inc";
    const I2: &str = "2024-01-03_10.00.00.000000.host.inc";
    const I3: &str = "2024-01-04_10.00.00.000000.host.inc";

    use DumpdirCode::{Included as Y, NotDumped as N};

    /// F <- I1 <- I2, with `/data/a.txt` last changed in I1.
    fn chain(dir: &Path) -> SnapshotManager<FakeArchiver> {
        write_snapshot(dir, F, None, &[("/data/a.txt", Y), ("/data/b.txt", Y)]);
        write_snapshot(dir, I1, Some(F), &[("/data/a.txt", Y), ("/data/b.txt", N)]);
        write_snapshot(
            dir,
            I2,
            Some(I1),
            &[("/data/a.txt", N), ("/data/b.txt", N), ("/data/c.txt", Y)],
        );
        SnapshotManager::new(dir, FakeArchiver::default())
    }

    fn base_of(dir: &Path, name: &str) -> Option<String> {
        fs::read_to_string(dir.join(name).join(BASE_FILE)).ok()
    }

    #[test]
    fn test_list_skips_invalid_and_sorts_newest_first() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());
        fs::create_dir(dir.path().join("lost+found")).unwrap();
        fs::create_dir(dir.path().join(I3)).unwrap(); // no ver marker

        let names: Vec<String> = manager
            .list(&ListFilter::All)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec![I2, I1, F]);
    }

    #[test]
    fn test_list_is_memoized_until_refresh() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());
        assert_eq!(manager.list(&ListFilter::All).unwrap().len(), 3);

        write_snapshot(dir.path(), I3, Some(I2), &[("/data/d.txt", Y)]);
        assert_eq!(manager.list(&ListFilter::All).unwrap().len(), 3);

        manager.refresh();
        assert_eq!(manager.list(&ListFilter::All).unwrap().len(), 4);
        assert_eq!(manager.get(I3).unwrap().base().map(|b| b.as_str()), Some(I2));
        assert!(matches!(
            manager.get("2030-01-01_00.00.00.000000.host.ful"),
            Err(EngineError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn test_list_filters() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());

        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let on_day = manager.list(&ListFilter::OnDate(day)).unwrap();
        assert_eq!(on_day.len(), 1);
        assert_eq!(on_day[0].name().as_str(), I1);

        let range = ListFilter::DateRange {
            from: day.and_hms_opt(0, 0, 0).unwrap(),
            to: NaiveDate::from_ymd_opt(2024, 1, 3)
                .unwrap()
                .and_hms_opt(23, 59, 59)
                .unwrap(),
        };
        assert_eq!(manager.list(&range).unwrap().len(), 2);
    }

    #[test]
    fn test_rebase_forbidden() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());

        assert!(matches!(
            manager.rebase(F, I1),
            Err(EngineError::RebaseForbidden(_))
        ));
        assert!(matches!(
            manager.rebase(I1, I2),
            Err(EngineError::RebaseForbidden(_))
        ));
        assert!(matches!(
            manager.rebase(I1, I1),
            Err(EngineError::RebaseForbidden(_))
        ));
        assert_eq!(base_of(dir.path(), I1).as_deref(), Some(F));
    }

    #[test]
    fn test_rebase_folds_skipped_content() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());

        manager.rebase(I2, F).unwrap();

        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(F));
        assert!(dir.path().join(I2).join(VERSION_FILE).is_file());
        assert!(!dir.path().join(I2).join(FOLD_SCRATCH).exists());
        assert!(!dir.path().join(I2).join(FOLD_STAGING).exists());

        // I1's copy of a.txt now belongs to I2.
        let contents = manager.get(I2).unwrap().contents().unwrap();
        assert_eq!(contents.properties("/data/a.txt"), Some("Y"));
        assert_eq!(contents.properties("/data/b.txt"), Some("N"));

        let archive = fs::read_to_string(dir.path().join(I2).join("files.tar.gz")).unwrap();
        assert_eq!(archive, "data/a.txt\ndata/c.txt\n");

        let layers = manager.revert_state(I2, "/data", None).unwrap();
        let owners: Vec<&Path> = layers.keys().map(PathBuf::as_path).collect();
        assert_eq!(owners, vec![dir.path().join(F), dir.path().join(I2)]);
        assert!(layers[&dir.path().join(F)].has_effective_file("/data/b.txt"));
        assert!(!layers[&dir.path().join(F)].has_effective_file("/data/a.txt"));
    }

    #[test]
    fn test_remove_incremental_reparents_children() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());

        manager.remove(I1).unwrap();

        assert!(!dir.path().join(I1).exists());
        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(F));
        let names: Vec<String> = manager
            .list(&ListFilter::All)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec![I2, F]);
    }

    #[test]
    fn test_remove_full_promotes_children() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());

        manager.remove(F).unwrap();

        let promoted = "2024-01-02_10.00.00.000000.host.ful";
        assert!(!dir.path().join(F).exists());
        assert!(!dir.path().join(I1).exists());
        assert!(base_of(dir.path(), promoted).is_none());
        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(promoted));

        let full = manager.get(promoted).unwrap();
        assert!(full.is_full());
        let contents = full.contents().unwrap();
        assert_eq!(contents.properties("/data/a.txt"), Some("Y"));
        assert_eq!(contents.properties("/data/b.txt"), Some("Y"));
        assert_eq!(
            manager.revert_state(promoted, "/data", None).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_rebase_onto_unrelated_snapshot_is_forbidden() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());
        let other = "2023-12-31_10.00.00.000000.host.ful";
        write_snapshot(dir.path(), other, None, &[("/data/z.txt", Y)]);

        assert!(matches!(
            manager.rebase(I2, other),
            Err(EngineError::RebaseForbidden(_))
        ));
        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(I1));
    }

    #[test]
    fn test_failed_rebase_keeps_snapshot_committed() {
        let dir = TempDir::new().unwrap();
        chain(dir.path());
        let before = fs::read(dir.path().join(I2).join(SNAR_FILE)).unwrap();
        let mut manager = SnapshotManager::new(dir.path(), FakeArchiver::failing());

        assert!(matches!(
            manager.rebase(I2, F),
            Err(EngineError::ArchiveToolFailure { .. })
        ));

        let target = dir.path().join(I2);
        assert!(target.join(VERSION_FILE).is_file());
        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(I1));
        assert_eq!(fs::read(target.join(SNAR_FILE)).unwrap(), before);
        assert!(!target.join(FOLD_SCRATCH).exists());
        assert!(!target.join(FOLD_STAGING).exists());
        assert_eq!(manager.list(&ListFilter::All).unwrap().len(), 3);
    }

    #[test]
    fn test_missing_ancestor_archive_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());
        fs::remove_file(dir.path().join(I1).join("files.tar.gz")).unwrap();

        assert!(matches!(
            manager.rebase(I2, F),
            Err(EngineError::IncompleteSnapshot(_))
        ));
        assert!(dir.path().join(I2).join(VERSION_FILE).is_file());
        assert_eq!(base_of(dir.path(), I2).as_deref(), Some(I1));
        assert_eq!(manager.get(I2).unwrap().base().map(|b| b.as_str()), Some(I1));
    }

    #[test]
    fn test_failed_promotion_keeps_chain_listed() {
        let dir = TempDir::new().unwrap();
        chain(dir.path());
        let mut manager = SnapshotManager::new(dir.path(), FakeArchiver::failing());

        assert!(manager.remove(F).is_err());

        let names: Vec<String> = manager
            .list(&ListFilter::All)
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec![I2, I1, F]);
        assert!(!dir.path().join("2024-01-02_10.00.00.000000.host.ful").exists());
        assert!(!dir.path().join(I1).join(FOLD_STAGING).exists());
    }

    #[test]
    fn test_remove_missing_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut manager = chain(dir.path());
        assert!(matches!(
            manager.remove(I3),
            Err(EngineError::SnapshotNotFound(_))
        ));
    }
}
