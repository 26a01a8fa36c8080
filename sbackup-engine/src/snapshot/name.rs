//! Snapshot directory names: `YYYY-MM-DD_HH.mm.ss.ffffff.<host>.<ful|inc>`.
//!
//! Version 1.0 snapshots used `:` between the time fields.

use crate::utils::errors::{EngineError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::fmt;

const DATE_LEN: usize = "YYYY-MM-DD_HH.mm.ss.ffffff".len();
const DATE_FORMAT: &str = "%Y-%m-%d_%H.%M.%S%.6f";
const LEGACY_DATE_FORMAT: &str = "%Y-%m-%d_%H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Full,
    Incremental,
}

impl SnapshotKind {
    pub fn suffix(self) -> &'static str {
        match self {
            SnapshotKind::Full => "ful",
            SnapshotKind::Incremental => "inc",
        }
    }
}

/// A validated snapshot name. Ordering by the raw string is chronological.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName(String);

impl SnapshotName {
    pub fn parse(name: &str) -> Result<Self> {
        Self::split(name)?;
        Ok(Self(name.to_string()))
    }

    /// Build a fresh name for a snapshot taken at `at`.
    pub fn generate(at: NaiveDateTime, host: &str, kind: SnapshotKind) -> Result<Self> {
        Self::parse(&format!(
            "{}.{}.{}",
            at.format(DATE_FORMAT),
            host,
            kind.suffix()
        ))
    }

    fn invalid(name: &str) -> EngineError {
        EngineError::InvalidSnapshotName(name.to_string())
    }

    /// (date, host, kind) components.
    fn split(name: &str) -> Result<(NaiveDateTime, &str, SnapshotKind)> {
        let (rest, kind) = name.rsplit_once('.').ok_or_else(|| Self::invalid(name))?;
        let kind = match kind {
            "ful" => SnapshotKind::Full,
            "inc" => SnapshotKind::Incremental,
            _ => return Err(Self::invalid(name)),
        };

        let date = rest.get(..DATE_LEN).ok_or_else(|| Self::invalid(name))?;
        let host = rest
            .get(DATE_LEN..)
            .and_then(|h| h.strip_prefix('.'))
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Self::invalid(name))?;

        let format = if date.contains(':') {
            LEGACY_DATE_FORMAT
        } else {
            DATE_FORMAT
        };
        let date = NaiveDateTime::parse_from_str(date, format).map_err(|_| Self::invalid(name))?;
        Ok((date, host, kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn date(&self) -> NaiveDateTime {
        // Validated at construction.
        Self::split(&self.0).map(|(date, _, _)| date).unwrap_or_default()
    }

    pub fn host(&self) -> &str {
        Self::split(&self.0).map(|(_, host, _)| host).unwrap_or_default()
    }

    pub fn kind(&self) -> SnapshotKind {
        Self::split(&self.0)
            .map(|(_, _, kind)| kind)
            .unwrap_or(SnapshotKind::Full)
    }

    /// True for names still using the version 1.0 `:` separators.
    pub fn is_legacy(&self) -> bool {
        self.0[..DATE_LEN].contains(':')
    }

    /// The same name with `:` separators replaced by `.`.
    pub fn modernized(&self) -> SnapshotName {
        let (date, rest) = self.0.split_at(DATE_LEN);
        SnapshotName(format!("{}{}", date.replace(':', "."), rest))
    }

    /// The same date and host with a different kind suffix.
    pub fn with_kind(&self, kind: SnapshotKind) -> SnapshotName {
        let (rest, _) = self.0.rsplit_once('.').unwrap_or((&self.0, ""));
        SnapshotName(format!("{rest}.{}", kind.suffix()))
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse the date out of a snapshot name.
pub fn parse_date(name: &str) -> Result<NaiveDateTime> {
    SnapshotName::split(name).map(|(date, _, _)| date)
}
