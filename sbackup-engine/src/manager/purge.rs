//! Retention policies.
//!
//! Discarded snapshots go through `remove`, newest first, so content a
//! retained snapshot still depends on is folded forward before deletion.

use super::{ListFilter, SnapshotManager};
use crate::archiver::Archiver;
use crate::snapshot::SnapshotName;
use crate::utils::errors::{EngineError, Result};
use chrono::{Duration, Local, NaiveDateTime};
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgePolicy {
    /// Delete everything older than `max_age_days`.
    Simple { max_age_days: i64 },
    /// Keep a decaying number of snapshots per period.
    Log,
}

/// Period a snapshot falls into under the logarithmic policy, by age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionBucket {
    /// Younger than 24 hours; always kept.
    Recent,
    Day(i64),
    Week(i64),
    Month(i64),
    Year(i64),
}

pub fn retention_bucket(age: Duration) -> RetentionBucket {
    if age < Duration::hours(24) {
        return RetentionBucket::Recent;
    }
    let days = age.num_days();
    match days {
        1..=6 => RetentionBucket::Day(days),
        7..=27 => RetentionBucket::Week(days / 7),
        28..=364 => RetentionBucket::Month(days / 30),
        _ => RetentionBucket::Year(days / 365),
    }
}

/// Snapshots the policy discards, given (name, date) pairs in any order.
fn select_discards(
    snapshots: &[(SnapshotName, NaiveDateTime)],
    policy: PurgePolicy,
    now: NaiveDateTime,
) -> Result<Vec<SnapshotName>> {
    match policy {
        PurgePolicy::Simple { max_age_days } => {
            let max_age = Duration::try_days(max_age_days).ok_or_else(|| {
                EngineError::Config(format!("max_age_days out of range: {max_age_days}"))
            })?;
            Ok(snapshots
                .iter()
                .filter(|(_, date)| now - *date > max_age)
                .map(|(name, _)| name.clone())
                .collect())
        }
        PurgePolicy::Log => {
            let mut oldest_first = snapshots.to_vec();
            oldest_first.sort_by(|a, b| a.0.cmp(&b.0));

            // The earliest snapshot of each bucket is the one kept.
            let mut seen = HashSet::new();
            Ok(oldest_first
                .into_iter()
                .filter(|(_, date)| match retention_bucket(now - *date) {
                    RetentionBucket::Recent => false,
                    bucket => !seen.insert(bucket),
                })
                .map(|(name, _)| name)
                .collect())
        }
    }
}

impl<A: Archiver> SnapshotManager<A> {
    pub fn purge(&mut self, policy: PurgePolicy) -> Result<Vec<SnapshotName>> {
        self.purge_at(policy, Local::now().naive_local())
    }

    /// Apply `policy` as if the current time were `now`. Returns the removed names.
    pub fn purge_at(
        &mut self,
        policy: PurgePolicy,
        now: NaiveDateTime,
    ) -> Result<Vec<SnapshotName>> {
        let dated: Vec<(SnapshotName, NaiveDateTime)> = self
            .list(&ListFilter::All)?
            .iter()
            .map(|s| (s.name().clone(), s.date()))
            .collect();

        let mut discards = select_discards(&dated, policy, now)?;
        discards.sort_by(|a, b| b.cmp(a));
        info!(
            "Purging {} of {} snapshots ({:?} policy)",
            discards.len(),
            dated.len(),
            policy
        );

        let mut result = Ok(());
        for name in &discards {
            info!("Purging snapshot {}", name);
            if let Err(e) = self.remove_snapshot(name) {
                result = Err(e);
                break;
            }
        }
        self.refresh();
        result.map(|_| discards)
    }
}
