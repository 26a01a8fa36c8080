//! Record types of GNU tar's listed-incremental ("snar") files.
//!
//! Names are kept as raw bytes: tar compares them byte for byte, and file
//! names need not be UTF-8.

use serde::{Serialize, Serializer};

/// Control code prefixed to each dumpdir entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DumpdirCode {
    /// `Y`: file is stored in this archive.
    Included,
    /// `N`: file exists but was not dumped (unchanged since the base).
    NotDumped,
    /// `D`: entry is a directory.
    Directory,
    /// `R`: original name of a renamed directory.
    RenamedFrom,
    /// `T`: new name of a renamed directory.
    RenamedTo,
    /// `X`: temporary directory used while applying renames.
    TempDir,
}

impl DumpdirCode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'Y' => Some(Self::Included),
            b'N' => Some(Self::NotDumped),
            b'D' => Some(Self::Directory),
            b'R' => Some(Self::RenamedFrom),
            b'T' => Some(Self::RenamedTo),
            b'X' => Some(Self::TempDir),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Included => b'Y',
            Self::NotDumped => b'N',
            Self::Directory => b'D',
            Self::RenamedFrom => b'R',
            Self::RenamedTo => b'T',
            Self::TempDir => b'X',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Included => "Y",
            Self::NotDumped => "N",
            Self::Directory => "D",
            Self::RenamedFrom => "R",
            Self::RenamedTo => "T",
            Self::TempDir => "X",
        }
    }

    /// Whether the entry's content is carried by the archive that owns the record.
    pub fn is_recorded(self) -> bool {
        matches!(self, Self::Included | Self::Directory)
    }
}

fn lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DumpdirEntry {
    pub code: DumpdirCode,
    #[serde(serialize_with = "lossy")]
    pub name: Vec<u8>,
}

impl DumpdirEntry {
    pub fn new(code: DumpdirCode, name: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            name: name.into(),
        }
    }
}

/// Parent directory and entry name of an absolute path. Top-level entries
/// belong to the `/` record; `/` itself has an empty name.
pub fn split_parent(path: &str) -> (String, String) {
    let (parent, name) = path.rsplit_once('/').unwrap_or(("", path));
    let parent = if parent.is_empty() { "/" } else { parent };
    (parent.to_string(), name.to_string())
}

/// Byte-level [`split_parent`], for names read from snar files.
pub fn split_parent_bytes(path: &[u8]) -> (Vec<u8>, Vec<u8>) {
    match path.iter().rposition(|b| *b == b'/') {
        Some(0) => (b"/".to_vec(), path[1..].to_vec()),
        Some(i) => (path[..i].to_vec(), path[i + 1..].to_vec()),
        None => (b"/".to_vec(), path.to_vec()),
    }
}

/// One scanned directory. Formats 0 and 1 carry no dumpdir, so `entries` stays empty.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SnarRecord {
    pub nfs: bool,
    pub mtime_secs: i64,
    pub mtime_nanos: i64,
    pub dev: u64,
    pub ino: u64,
    #[serde(serialize_with = "lossy")]
    pub name: Vec<u8>,
    pub entries: Vec<DumpdirEntry>,
}

impl SnarRecord {
    /// Directory name for display and indexing. Invalid UTF-8 is replaced.
    pub fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    /// Full path of a dumpdir entry inside this directory, as stored.
    pub fn child_path_bytes(&self, entry: &DumpdirEntry) -> Vec<u8> {
        let mut path = self.name.clone();
        if !path.ends_with(b"/") {
            path.push(b'/');
        }
        path.extend_from_slice(&entry.name);
        path
    }

    /// [`Self::child_path_bytes`] for display and indexing.
    pub fn child_path(&self, entry: &DumpdirEntry) -> String {
        String::from_utf8_lossy(&self.child_path_bytes(entry)).into_owned()
    }

    /// Full paths of the entries whose content this archive carries.
    pub fn recorded_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.entries
            .iter()
            .filter(|e| e.code.is_recorded())
            .map(|e| self.child_path(e))
    }
}

/// File-level header: format version and the snapshot time stamp.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SnarHeader {
    pub format: u8,
    pub tar_version: Option<String>,
    pub timestamp_secs: i64,
    pub timestamp_nanos: i64,
}
