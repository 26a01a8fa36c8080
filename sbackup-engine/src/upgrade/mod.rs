//! In-place migration of snapshot directories between layout versions.
//!
//! Versions form a line: 1.0/1.1 -> 1.2 -> 1.3 -> 1.4 -> 1.5. Each step
//! checks its inputs, deletes the `ver` marker, mutates the directory and
//! writes the new marker only when it succeeded. Downgrades stop at 1.2.

use crate::fs::metadata::FileMetadata;
use crate::index::PathIndex;
use crate::snapshot::legacy::{self, FILESLIST, FLIST, FPROPS, NEWLINE_SEPARATOR, NUL_SEPARATOR};
use crate::snapshot::{
    clear_version_marker, read_trimmed, render_list, write_version_marker, Compression,
    FormatDescriptor, SnapshotName, Version, BASE_FILE, EXCLUDED, EXCLUDES_FILE, EXCLUDES_LIST,
    FORMAT_FILE, INCLUDED, INCLUDES_LIST, LEGACY_ARCHIVE, SNAR_FILE, VERSION_FILE,
};
use crate::snar::{self, split_parent, DumpdirCode, DumpdirEntry, SnarRecord};
use crate::utils::errors::{EngineError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy)]
pub struct UpgradeManager;

fn snapshot_name(dir: &Path) -> Result<SnapshotName> {
    let segment = dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| EngineError::InvalidSnapshotName(dir.display().to_string()))?;
    SnapshotName::parse(segment)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

impl UpgradeManager {
    pub fn new() -> Self {
        Self
    }

    /// Version recorded in the `ver` marker, without validating anything else.
    pub fn read_version(dir: &Path) -> Result<Version> {
        read_trimmed(&dir.join(VERSION_FILE))?
            .ok_or_else(|| {
                EngineError::IncompleteSnapshot(format!(
                    "{}: missing {VERSION_FILE} marker",
                    dir.display()
                ))
            })?
            .parse()
    }

    /// Upgrade the snapshot at `dir` to `target`. Returns its directory,
    /// which changes when a legacy name is modernized.
    pub fn upgrade(&self, dir: &Path, target: Version) -> Result<PathBuf> {
        let mut dir = dir.to_path_buf();
        let mut version = Self::read_version(&dir)?;
        if target < version {
            return Err(EngineError::UnsupportedVersion(format!(
                "{} is at {version}, cannot upgrade to {target}",
                dir.display()
            )));
        }

        while version < target {
            let next = match version {
                Version::V1_0 | Version::V1_1 => Version::V1_2,
                Version::V1_2 => Version::V1_3,
                Version::V1_3 => Version::V1_4,
                Version::V1_4 | Version::V1_5 => Version::V1_5,
            };
            if next > target {
                return Err(EngineError::UnsupportedVersion(format!(
                    "no migration from {version} stops at {target}"
                )));
            }

            info!("Upgrading {} from {} to {}", dir.display(), version, next);
            check_upgrade(&dir, version)?;
            clear_version_marker(&dir)?;
            match version {
                Version::V1_0 | Version::V1_1 => dir = upgrade_to_1_2(&dir)?,
                Version::V1_2 => upgrade_to_1_3(&dir)?,
                Version::V1_3 => {}
                Version::V1_4 | Version::V1_5 => upgrade_to_1_5(&dir)?,
            }
            write_version_marker(&dir, next)?;
            version = next;
        }
        Ok(dir)
    }

    /// Downgrade the snapshot at `dir` to `target`, which must be 1.2 or later.
    pub fn downgrade(&self, dir: &Path, target: Version) -> Result<PathBuf> {
        let mut version = Self::read_version(dir)?;
        if target < Version::V1_2 || target > version {
            return Err(EngineError::UnsupportedDowngrade(format!(
                "{} from {version} to {target}",
                dir.display()
            )));
        }

        while version > target {
            let previous = match version {
                Version::V1_5 => Version::V1_4,
                Version::V1_4 => Version::V1_3,
                Version::V1_3 => Version::V1_2,
                other => {
                    return Err(EngineError::UnsupportedDowngrade(format!(
                        "{} below {other}",
                        dir.display()
                    )))
                }
            };

            info!("Downgrading {} from {} to {}", dir.display(), version, previous);
            check_downgrade(dir, version)?;
            clear_version_marker(dir)?;
            match version {
                Version::V1_5 => downgrade_to_1_4(dir)?,
                Version::V1_4 => remove_if_exists(&dir.join(FORMAT_FILE))?,
                _ => downgrade_to_1_2(dir)?,
            }
            write_version_marker(dir, previous)?;
            version = previous;
        }
        Ok(dir.to_path_buf())
    }

    /// Upgrade every snapshot in `target_dir` to the current version,
    /// oldest first. Failures are logged and the snapshot is left as it is.
    pub fn upgrade_target(&self, target_dir: &Path) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(target_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() && snapshot_name(&entry.path()).is_ok() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();

        let mut upgraded = Vec::new();
        for dir in dirs {
            match Self::read_version(&dir) {
                Ok(Version::CURRENT) => debug!("{} is up to date", dir.display()),
                Ok(_) => match self.upgrade(&dir, Version::CURRENT) {
                    Ok(path) => upgraded.push(path),
                    Err(e) => warn!("Failed to upgrade {}: {}", dir.display(), e),
                },
                Err(e) => warn!("Skipping {}: {}", dir.display(), e),
            }
        }
        Ok(upgraded)
    }
}

/// Validate the inputs of the step leaving `from` before anything is touched.
fn check_upgrade(dir: &Path, from: Version) -> Result<()> {
    match from {
        Version::V1_0 | Version::V1_1 => legacy::read_fileslist(dir).map(|_| ()),
        Version::V1_2 => legacy::read_pair(dir, NEWLINE_SEPARATOR).map(|_| ()),
        Version::V1_3 => {
            let missing: Vec<&str> = [FLIST, FPROPS, EXCLUDES_FILE]
                .into_iter()
                .filter(|name| !dir.join(name).is_file())
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::IncompleteSnapshot(format!(
                    "{}: missing {}",
                    dir.display(),
                    missing.join(", ")
                )));
            }
            legacy_archive(dir).map(|_| ())
        }
        Version::V1_4 => {
            legacy_archive(dir)?;
            legacy::read_pair(dir, NUL_SEPARATOR).map(|_| ())
        }
        Version::V1_5 => Ok(()),
    }
}

fn check_downgrade(dir: &Path, from: Version) -> Result<()> {
    match from {
        Version::V1_4 => {
            let format = read_format(dir)?;
            if format.compression != Compression::Gzip {
                return Err(EngineError::UnsupportedDowngrade(format!(
                    "{}: {} archives cannot be stored as 1.3",
                    dir.display(),
                    format.compression
                )));
            }
            Ok(())
        }
        Version::V1_3 => {
            let entries = legacy::read_pair(dir, NUL_SEPARATOR)?;
            let multiline = entries
                .iter()
                .find(|(path, props)| path.contains('\n') || props.contains('\n'));
            if let Some((path, _)) = multiline {
                return Err(EngineError::DamagedMetadata(format!(
                    "{path:?} cannot be stored in a newline-separated list"
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn read_format(dir: &Path) -> Result<FormatDescriptor> {
    match read_trimmed(&dir.join(FORMAT_FILE))? {
        Some(text) => FormatDescriptor::parse(&text),
        None => Ok(FormatDescriptor::default()),
    }
}

/// Archive of a pre-1.5 snapshot: `files.tgz`, or the current gzip name
/// when an earlier attempt already renamed it.
fn legacy_archive(dir: &Path) -> Result<PathBuf> {
    [LEGACY_ARCHIVE, Compression::Gzip.archive_name()]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            EngineError::IncompleteSnapshot(format!("{}: missing {LEGACY_ARCHIVE}", dir.display()))
        })
}

/// Replace `fileslist` with a newline pair and drop the `:` separators
/// from the directory name and base reference.
fn upgrade_to_1_2(dir: &Path) -> Result<PathBuf> {
    let name = snapshot_name(dir)?;

    let entries: Vec<(String, String)> = legacy::read_fileslist(dir)?.into_iter().collect();
    legacy::write_pair(dir, &entries, NEWLINE_SEPARATOR)?;
    fs::remove_file(dir.join(FILESLIST))?;

    let base_path = dir.join(BASE_FILE);
    if let Some(base) = read_trimmed(&base_path)?.filter(|b| !b.is_empty()) {
        let base = SnapshotName::parse(&base)?;
        if base.is_legacy() {
            fs::write(&base_path, base.modernized().as_str())?;
        }
    }

    if !name.is_legacy() {
        return Ok(dir.to_path_buf());
    }
    let renamed = dir.with_file_name(name.modernized().as_str());
    debug!("Renaming {} to {}", dir.display(), renamed.display());
    fs::rename(dir, &renamed)?;
    Ok(renamed)
}

fn upgrade_to_1_3(dir: &Path) -> Result<()> {
    let entries = legacy::read_pair(dir, NEWLINE_SEPARATOR)?;
    legacy::write_pair(dir, &entries, NUL_SEPARATOR)
}

fn upgrade_to_1_5(dir: &Path) -> Result<()> {
    let name = snapshot_name(dir)?;

    let archive = legacy_archive(dir)?;
    let renamed = dir.join(Compression::Gzip.archive_name());
    if archive != renamed {
        fs::rename(&archive, &renamed)?;
    }

    let index = legacy::read_index(dir, Version::V1_4)?;
    let (included, excluded) = legacy::split_index(&index);
    fs::write(
        dir.join(INCLUDES_LIST),
        render_list(included.iter_effective_files()),
    )?;
    fs::write(
        dir.join(EXCLUDES_LIST),
        render_list(excluded.iter_effective_files()),
    )?;
    fs::write(dir.join(FORMAT_FILE), FormatDescriptor::default().render())?;

    let records = synthesize_records(&included);
    let timestamp = name.date().and_utc().timestamp();
    snar::emit(&dir.join(SNAR_FILE), (timestamp, 0), &records)?;
    debug!(
        "Synthesized {} incremental records for {}",
        records.len(),
        name
    );
    Ok(())
}

/// Dumpdir code for an included path: what is on disk now, or, for paths
/// that are gone, whether the index holds anything below it.
fn child_code(path: &str, included: &PathIndex) -> DumpdirCode {
    match FileMetadata::stat(Path::new(path)) {
        Some(meta) if meta.is_dir => DumpdirCode::Directory,
        Some(_) => DumpdirCode::Included,
        None if included.get_child(path).is_some_and(|c| !c.is_empty()) => {
            DumpdirCode::Directory
        }
        None => DumpdirCode::Included,
    }
}

/// One record per parent directory of an included path.
fn synthesize_records(included: &PathIndex) -> Vec<SnarRecord> {
    let mut dirs: BTreeMap<String, Vec<DumpdirEntry>> = BTreeMap::new();
    for path in included.iter_effective_files() {
        let (parent, name) = split_parent(&path);
        if name.is_empty() {
            continue;
        }
        let code = child_code(&path, included);
        let entries = dirs.entry(parent).or_default();
        if !entries.iter().any(|e| e.name == name.as_bytes()) {
            entries.push(DumpdirEntry::new(code, name));
        }
    }

    dirs.into_iter()
        .map(|(parent, mut entries)| {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            let meta = FileMetadata::stat(Path::new(&parent));
            SnarRecord {
                nfs: false,
                mtime_secs: meta.as_ref().map_or(0, |m| m.mtime_secs),
                mtime_nanos: meta.as_ref().map_or(0, |m| m.mtime_nanos),
                dev: meta.as_ref().map_or(0, |m| m.dev),
                ino: meta.as_ref().map_or(0, |m| m.ino),
                name: parent.into_bytes(),
                entries,
            }
        })
        .collect()
}

fn downgrade_to_1_4(dir: &Path) -> Result<()> {
    let format = read_format(dir)?;

    if !(dir.join(FLIST).is_file() && dir.join(FPROPS).is_file()) {
        let read_list = |file: &str, props: &str| -> Result<PathIndex> {
            let text = fs::read_to_string(dir.join(file)).map_err(|e| {
                EngineError::IncompleteSnapshot(format!("{}: {e}", dir.join(file).display()))
            })?;
            PathIndex::parse_list(&text, props)
        };
        let mut index = read_list(INCLUDES_LIST, INCLUDED)?;
        for path in read_list(EXCLUDES_LIST, EXCLUDED)?.iter_effective_files() {
            index.set(&path, EXCLUDED);
        }
        legacy::write_pair(dir, &legacy::index_entries(&index), NUL_SEPARATOR)?;
    }

    if format.compression == Compression::Gzip && format.split_size == 0 {
        let current = dir.join(Compression::Gzip.archive_name());
        if current.is_file() {
            fs::rename(current, dir.join(LEGACY_ARCHIVE))?;
        }
        remove_if_exists(&dir.join(FORMAT_FILE))?;
    }

    for artifact in [INCLUDES_LIST, EXCLUDES_LIST, SNAR_FILE] {
        remove_if_exists(&dir.join(artifact))?;
    }
    Ok(())
}

fn downgrade_to_1_2(dir: &Path) -> Result<()> {
    let entries = legacy::read_pair(dir, NUL_SEPARATOR)?;
    legacy::write_pair(dir, &entries, NEWLINE_SEPARATOR)
}
