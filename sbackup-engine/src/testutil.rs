use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDateTime;

use crate::archiver::{Archiver, CreateRequest, ExtractRequest, Members};
use crate::fs::walker;
use crate::snapshot::{
    render_list, Compression, FormatDescriptor, SnapshotKind, SnapshotName, Version, BASE_FILE,
    EXCLUDES_FILE, EXCLUDES_LIST, FORMAT_FILE, INCLUDES_LIST, SNAR_FILE, VERSION_FILE,
};
use crate::snar::{self, split_parent, DumpdirCode, DumpdirEntry, SnarRecord};
use crate::utils::errors::{EngineError, Result};

/// In-process stand-in for tar.
///
/// An archive is a text file with one relative member path per line.
/// Extraction writes each selected member as a file holding the archive
/// path, so tests can tell which layer a restored file came from.
#[derive(Default)]
pub struct FakeArchiver {
    fail: bool,
    marker_seen: Mutex<Vec<bool>>,
    extractions: Mutex<Vec<ExtractRequest>>,
}

impl FakeArchiver {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// For each `create` call, whether the snapshot's `ver` marker already existed.
    pub fn marker_seen_during_create(&self) -> Vec<bool> {
        self.marker_seen.lock().unwrap().clone()
    }

    pub fn extractions(&self) -> Vec<ExtractRequest> {
        self.extractions.lock().unwrap().clone()
    }
}

/// Group absolute paths into snar records, adding `D` entries for every ancestor.
pub fn snar_records(entries: &[(&str, DumpdirCode)]) -> Vec<SnarRecord> {
    let mut dirs: BTreeMap<String, Vec<DumpdirEntry>> = BTreeMap::new();

    let mut add = |parent: String, entry: DumpdirEntry| {
        let list = dirs.entry(parent).or_default();
        if !list.iter().any(|e| e.name == entry.name) {
            list.push(entry);
        }
    };

    for (path, code) in entries {
        let (mut parent, name) = split_parent(path);
        add(parent.clone(), DumpdirEntry::new(*code, name));
        while parent != "/" {
            let (grandparent, dir) = split_parent(&parent);
            add(grandparent.clone(), DumpdirEntry::new(DumpdirCode::Directory, dir));
            parent = grandparent;
        }
    }

    dirs.into_iter()
        .map(|(name, mut entries)| {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            SnarRecord {
                name: name.into_bytes(),
                entries,
                ..Default::default()
            }
        })
        .collect()
}

fn failure(message: &str) -> EngineError {
    EngineError::ArchiveToolFailure {
        status: Some(2),
        stderr: message.to_string(),
    }
}

fn read_members(archive: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(archive)
        .map_err(|e| failure(&format!("{}: {e}", archive.display())))?;
    Ok(text.lines().map(str::to_string).collect())
}

fn selects(members: &Members, member: &str) -> bool {
    let matches = |wanted: &Path| {
        let wanted = wanted.to_string_lossy();
        let wanted = wanted.trim_start_matches('/');
        member == wanted || member.starts_with(&format!("{wanted}/"))
    };
    match members {
        Members::All => true,
        Members::Single(name) => matches(name.as_path()),
        Members::List(names) => names.iter().any(|n| matches(n.as_path())),
    }
}

impl Archiver for FakeArchiver {
    fn create(&self, request: &CreateRequest) -> Result<()> {
        if self.fail {
            return Err(failure("fake archiver failure"));
        }

        let marker = request
            .archive
            .parent()
            .map(|dir| dir.join(VERSION_FILE).exists())
            .unwrap_or(false);
        self.marker_seen.lock().unwrap().push(marker);

        // Paths under the live root are recorded as listed; scratch trees are walked.
        let scan = request.directory != Path::new("/");
        let mut members = Vec::new();
        for line in fs::read_to_string(&request.files_from)?.lines() {
            let rel = line.trim_start_matches('/');
            if rel.is_empty() {
                continue;
            }
            let on_disk = request.directory.join(rel);
            if scan && on_disk.is_dir() {
                for file in walker::walk_directory(&on_disk)? {
                    members.push(format!("{rel}/{}", file.relative_path.display()));
                }
            } else {
                members.push(rel.to_string());
            }
        }
        fs::write(&request.archive, render_list(members.iter().cloned()))?;

        if let Some(state) = &request.listed_incremental {
            let absolute: Vec<String> = members.iter().map(|m| format!("/{m}")).collect();
            let entries: Vec<(&str, DumpdirCode)> = absolute
                .iter()
                .map(|p| (p.as_str(), DumpdirCode::Included))
                .collect();
            snar::emit(state, (0, 0), &snar_records(&entries))?;
        }
        Ok(())
    }

    fn extract(&self, request: &ExtractRequest) -> Result<()> {
        if self.fail {
            return Err(failure("fake archiver failure"));
        }
        self.extractions.lock().unwrap().push(request.clone());

        for member in read_members(&request.archive)? {
            if !selects(&request.members, &member) {
                continue;
            }
            let dest = request.target_dir.join(&member);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if let (Some(suffix), true) = (&request.backup_suffix, dest.exists()) {
                let mut kept = dest.clone().into_os_string();
                kept.push(suffix);
                fs::rename(&dest, kept)?;
            }
            fs::write(&dest, format!("{}\n", request.archive.display()))?;
        }
        Ok(())
    }
}

/// Write a committed 1.5 gzip snapshot directly, bypassing the archiver.
/// `Y` paths become archive members; every path is recorded in `files.snar`.
pub fn write_snapshot(
    target: &Path,
    name: &str,
    base: Option<&str>,
    recorded: &[(&str, DumpdirCode)],
) -> PathBuf {
    let dir = target.join(name);
    fs::create_dir_all(&dir).unwrap();

    if let Some(base) = base {
        fs::write(dir.join(BASE_FILE), base).unwrap();
    }
    fs::write(dir.join(FORMAT_FILE), FormatDescriptor::default().render()).unwrap();
    fs::write(dir.join(EXCLUDES_FILE), "").unwrap();
    fs::write(dir.join(EXCLUDES_LIST), "").unwrap();

    let included: Vec<String> = recorded
        .iter()
        .filter(|(_, code)| code.is_recorded())
        .map(|(path, _)| path.to_string())
        .collect();
    fs::write(dir.join(INCLUDES_LIST), render_list(included)).unwrap();

    let members: Vec<String> = recorded
        .iter()
        .filter(|(_, code)| *code == DumpdirCode::Included)
        .map(|(path, _)| path.trim_start_matches('/').to_string())
        .collect();
    fs::write(
        dir.join(Compression::Gzip.archive_name()),
        render_list(members),
    )
    .unwrap();

    snar::emit(&dir.join(SNAR_FILE), (0, 0), &snar_records(recorded)).unwrap();
    fs::write(dir.join(VERSION_FILE), Version::CURRENT.as_str()).unwrap();
    dir
}

/// Name of a snapshot taken at `at` on a host called `host`.
pub fn name_at(at: NaiveDateTime, kind: SnapshotKind) -> String {
    SnapshotName::generate(at, "host", kind).unwrap().to_string()
}
