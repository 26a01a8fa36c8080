//! Revert-state computation: which snapshot holds the newest copy of each path.

use super::SnapshotManager;
use crate::archiver::{Archiver, ExtractRequest, Members};
use crate::fs::raw::path_from_bytes;
use crate::index::PathIndex;
use crate::snapshot::{Snapshot, SnapshotName, SNAR_FILE};
use crate::snar::{self, DumpdirCode};
use crate::utils::errors::{EngineError, Result};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Dumpdir code of a content-index entry, if its content is in the owning archive.
pub(super) fn recorded_code(properties: Option<&str>) -> Option<DumpdirCode> {
    let code = DumpdirCode::from_byte(*properties?.as_bytes().first()?)?;
    code.is_recorded().then_some(code)
}

/// Entries under `path` recorded by `contents` and not yet claimed by a newer layer.
fn claim_recorded(contents: &PathIndex, path: &str, claimed: &mut HashSet<String>) -> PathIndex {
    let mut layer = PathIndex::new();
    let Some(entries) = contents.iter_subtree(path) else {
        return layer;
    };
    for (entry_path, node) in entries {
        let Some(code) = recorded_code(node.properties()) else {
            continue;
        };
        if claimed.insert(entry_path.clone()) {
            layer.set(&entry_path, code.as_str());
        }
    }
    layer
}

/// Raw `files.snar` paths of `layer` that `claimed` assigns to it, with their codes.
pub(super) fn claimed_entries(
    layer: &Snapshot,
    claimed: &PathIndex,
) -> Result<Vec<(Vec<u8>, DumpdirCode)>> {
    let mut entries = Vec::new();
    for record in snar::parse(&layer.path().join(SNAR_FILE))? {
        let record = record?;
        for entry in &record.entries {
            let claimed = claimed.properties(&record.child_path(entry)).is_some();
            if claimed && entry.code.is_recorded() {
                entries.push((record.child_path_bytes(entry), entry.code));
            }
        }
    }
    Ok(entries)
}

/// Archive members among `entries`: the ones with file content.
pub(super) fn archived_members(entries: &[(Vec<u8>, DumpdirCode)]) -> Vec<PathBuf> {
    entries
        .iter()
        .filter(|(_, code)| *code == DumpdirCode::Included)
        .map(|(path, _)| path_from_bytes(path.clone()))
        .collect()
}

impl<A: Archiver> SnapshotManager<A> {
    /// Per-snapshot contributions needed to rebuild `path` as of `name`.
    ///
    /// Keys are snapshot directories; each value holds the sub-paths whose
    /// newest recorded copy lives in that snapshot. The walk follows base
    /// pointers until a full snapshot or `stop_at`, which is not visited.
    pub fn revert_state(
        &self,
        name: &str,
        path: &str,
        stop_at: Option<&str>,
    ) -> Result<BTreeMap<PathBuf, PathIndex>> {
        let snapshot = self.open(&SnapshotName::parse(name)?)?;
        let stop_at = stop_at.map(SnapshotName::parse).transpose()?;

        if !snapshot.contents()?.has_path(path) {
            return Err(EngineError::FileNotFoundInSnapshot {
                path: path.to_string(),
                snapshot: name.to_string(),
            });
        }
        self.collect_layers(&snapshot, path, stop_at.as_ref())
    }

    pub(super) fn collect_layers(
        &self,
        snapshot: &Snapshot,
        path: &str,
        stop_at: Option<&SnapshotName>,
    ) -> Result<BTreeMap<PathBuf, PathIndex>> {
        let mut layers = BTreeMap::new();
        let mut claimed = HashSet::new();
        let mut current = snapshot.clone();

        loop {
            let layer = claim_recorded(&current.contents()?, path, &mut claimed);
            if !layer.is_empty() {
                layers.insert(current.path().to_path_buf(), layer);
            }

            if current.is_full() {
                break;
            }
            let Some(base) = current.base().cloned() else {
                break;
            };
            if stop_at == Some(&base) {
                break;
            }
            if &base >= current.name() {
                return Err(EngineError::DamagedMetadata(format!(
                    "{} names newer base {base}",
                    current.name()
                )));
            }
            current = self.open(&base)?;
        }

        debug!(
            "{} layers contribute to {} in {}",
            layers.len(),
            path,
            snapshot.name()
        );
        Ok(layers)
    }

    /// Restore `path` as of `name` into `dest`, oldest layer first.
    /// Files already in `dest` are kept with `backup_suffix` appended when given.
    pub fn restore(
        &self,
        name: &str,
        path: &str,
        dest: &Path,
        backup_suffix: Option<&str>,
    ) -> Result<usize> {
        let layers = self.revert_state(name, path, None)?;
        info!(
            "Restoring {} from {} ({} layers) into {}",
            path,
            name,
            layers.len(),
            dest.display()
        );

        for (dir, claimed) in &layers {
            let layer = Snapshot::open(dir)?;
            let files = archived_members(&claimed_entries(&layer, claimed)?);
            if files.is_empty() {
                continue;
            }

            self.archiver.extract(&ExtractRequest {
                archive: layer.archive()?,
                compression: layer.compression(),
                target_dir: dest.to_path_buf(),
                members: Members::List(files),
                backup_suffix: backup_suffix.map(str::to_string),
                split_size: layer.split_size(),
            })?;
        }
        Ok(layers.len())
    }
}
