//! On-disk versions and archive formats.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Snapshot layout version, as stored in the `ver` marker file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Version {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1")]
    V1_1,
    #[serde(rename = "1.2")]
    V1_2,
    #[serde(rename = "1.3")]
    V1_3,
    #[serde(rename = "1.4")]
    V1_4,
    #[serde(rename = "1.5")]
    V1_5,
}

impl Version {
    pub const CURRENT: Version = Version::V1_5;

    pub const ALL: [Version; 6] = [
        Version::V1_0,
        Version::V1_1,
        Version::V1_2,
        Version::V1_3,
        Version::V1_4,
        Version::V1_5,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
            Version::V1_3 => "1.3",
            Version::V1_4 => "1.4",
            Version::V1_5 => "1.5",
        }
    }
}

impl FromStr for Version {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Version::ALL
            .into_iter()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| EngineError::UnsupportedVersion(s.trim().to_string()))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive compression, which also fixes the archive file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Gzip,
    Bzip2,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
        }
    }

    pub fn archive_name(self) -> &'static str {
        match self {
            Compression::None => "files.tar",
            Compression::Gzip => "files.tar.gz",
            Compression::Bzip2 => "files.tar.bz2",
        }
    }
}

impl FromStr for Compression {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "bzip2" => Ok(Compression::Bzip2),
            other => Err(EngineError::DamagedMetadata(format!(
                "unknown archive format: {other}"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contents of the `format` file: compression on the first line, split size on the second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatDescriptor {
    pub compression: Compression,
    pub split_size: u64,
}

impl FormatDescriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let compression = lines
            .next()
            .ok_or_else(|| EngineError::DamagedMetadata("empty format file".into()))?
            .parse()?;
        let split_size = match lines.next().map(str::trim) {
            None | Some("") => 0,
            Some(size) => parse_split_size(size)?,
        };
        Ok(Self {
            compression,
            split_size,
        })
    }

    pub fn render(&self) -> String {
        format!("{}\n{}\n", self.compression, self.split_size)
    }
}

/// Split size must be a non-negative integer; 0 disables splitting.
pub fn parse_split_size(s: &str) -> Result<u64> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| EngineError::InvalidSplitSize(s.to_string()))
}
