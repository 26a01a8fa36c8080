//! Pre-1.5 file indexes.
//!
//! Versions 1.2 to 1.4 keep two parallel files: `flist` (paths) and
//! `fprops` (one property string per path). 1.2 separates entries with
//! newlines, 1.3 and 1.4 with NUL bytes. Versions 1.0 and 1.1 keep a single
//! pickled `fileslist` dictionary instead.

use super::format::Version;
use crate::index::PathIndex;
use crate::utils::errors::{EngineError, Result};
use serde_pickle::{DeOptions, HashableValue, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const FILESLIST: &str = "fileslist";
pub const FLIST: &str = "flist";
pub const FPROPS: &str = "fprops";

/// Property marking a legacy entry as excluded.
pub const EXCLUDED_PROPERTY: &str = "0";

pub const NEWLINE_SEPARATOR: u8 = b'\n';
pub const NUL_SEPARATOR: u8 = 0;

/// Entry separator of the flist/fprops pair for `version`.
pub fn separator(version: Version) -> Option<u8> {
    match version {
        Version::V1_2 => Some(NEWLINE_SEPARATOR),
        Version::V1_3 | Version::V1_4 => Some(NUL_SEPARATOR),
        _ => None,
    }
}

/// Load the legacy index of a snapshot directory at `version`.
pub fn read_index(dir: &Path, version: Version) -> Result<PathIndex> {
    match version {
        Version::V1_0 | Version::V1_1 => {
            let mut index = PathIndex::new();
            for (path, props) in read_fileslist(dir)? {
                index.set(&path, props);
            }
            Ok(index)
        }
        Version::V1_5 => Err(EngineError::UnsupportedVersion(format!(
            "{version} snapshots have no legacy index"
        ))),
        _ => {
            let sep = separator(version).unwrap_or(NUL_SEPARATOR);
            let mut index = PathIndex::new();
            for (path, props) in read_pair(dir, sep)? {
                index.set(&path, props);
            }
            Ok(index)
        }
    }
}

/// Read the pickled `{ path: properties }` dictionary of 1.0/1.1 snapshots.
/// Python 2 byte strings are decoded as UTF-8.
pub fn read_fileslist(dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = dir.join(FILESLIST);
    let data = fs::read(&path).map_err(|e| {
        EngineError::IncompleteSnapshot(format!("{}: {e}", path.display()))
    })?;
    let damaged =
        |msg: String| EngineError::DamagedMetadata(format!("{}: {msg}", path.display()));

    let value = serde_pickle::value_from_slice(&data, DeOptions::new().decode_strings())
        .map_err(|e| damaged(e.to_string()))?;
    let dict = match value {
        Value::Dict(dict) => dict,
        other => return Err(damaged(format!("expected a dictionary, found {other:?}"))),
    };

    let mut entries = BTreeMap::new();
    for (key, props) in dict {
        let entry_path = match key {
            HashableValue::String(s) => s,
            HashableValue::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            other => return Err(damaged(format!("unexpected key {other:?}"))),
        };
        let props = match props {
            Value::String(s) => s,
            Value::Bytes(b) => String::from_utf8_lossy(&b).into_owned(),
            Value::I64(n) => n.to_string(),
            Value::Bool(true) => "1".to_string(),
            Value::Bool(false) => EXCLUDED_PROPERTY.to_string(),
            other => {
                return Err(damaged(format!(
                    "unexpected properties {other:?} for {entry_path}"
                )))
            }
        };
        entries.insert(entry_path, props);
    }
    Ok(entries)
}

fn split_entries(data: &[u8], sep: u8) -> Vec<String> {
    let mut items: Vec<String> = data
        .split(|b| *b == sep)
        .map(|item| String::from_utf8_lossy(item).into_owned())
        .collect();
    if items.last().is_some_and(|last| last.is_empty()) {
        items.pop();
    }
    items
}

/// Read the flist/fprops pair. Mismatched lengths mean the pair is damaged.
pub fn read_pair(dir: &Path, sep: u8) -> Result<Vec<(String, String)>> {
    let read = |name: &str| -> Result<Vec<String>> {
        let path = dir.join(name);
        let data = fs::read(&path).map_err(|e| {
            EngineError::IncompleteSnapshot(format!("{}: {e}", path.display()))
        })?;
        Ok(split_entries(&data, sep))
    };

    let paths = read(FLIST)?;
    let props = read(FPROPS)?;
    if paths.len() != props.len() {
        return Err(EngineError::DamagedMetadata(format!(
            "{}: {} has {} entries but {} has {}",
            dir.display(),
            FLIST,
            paths.len(),
            FPROPS,
            props.len()
        )));
    }
    Ok(paths.into_iter().zip(props).collect())
}

/// Write the flist/fprops pair with `sep` after every entry.
pub fn write_pair(dir: &Path, entries: &[(String, String)], sep: u8) -> Result<()> {
    let mut flist = Vec::new();
    let mut fprops = Vec::new();
    for (path, props) in entries {
        if sep == NEWLINE_SEPARATOR && (path.contains('\n') || props.contains('\n')) {
            return Err(EngineError::DamagedMetadata(format!(
                "entry {path:?} cannot be stored in a newline-separated list"
            )));
        }
        flist.extend_from_slice(path.as_bytes());
        flist.push(sep);
        fprops.extend_from_slice(props.as_bytes());
        fprops.push(sep);
    }
    fs::write(dir.join(FLIST), flist)?;
    fs::write(dir.join(FPROPS), fprops)?;
    Ok(())
}

/// Every effective entry of `index` as (path, properties).
pub fn index_entries(index: &PathIndex) -> Vec<(String, String)> {
    index
        .iter_entries()
        .filter_map(|(path, node)| node.properties().map(|p| (path, p.to_string())))
        .collect()
}

/// Split a legacy index into (included, excluded) indexes.
pub fn split_index(index: &PathIndex) -> (PathIndex, PathIndex) {
    let mut included = PathIndex::new();
    let mut excluded = PathIndex::new();
    for (path, props) in index_entries(index) {
        if props == EXCLUDED_PROPERTY {
            excluded.set(&path, props);
        } else {
            included.set(&path, props);
        }
    }
    (included, excluded)
}
