//! Snapshot Engine - Admin entry point
//!
//! Inspects and maintains a directory of tar snapshots.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use sbackup_engine::snapshot::format::Version;
use sbackup_engine::snapshot::SnapshotKind;
use sbackup_engine::{snar, utils, Config, ListFilter, SnapshotManager, UpgradeManager};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Snapshot directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    target: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List snapshots, newest first
    List {
        /// Print JSON summaries
        #[arg(long)]
        json: bool,

        /// First day to include (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to include (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Only snapshots taken on this day (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["from", "to"])]
        on: Option<NaiveDate>,
    },

    /// Take a new snapshot
    Create {
        /// Take a full snapshot instead of an incremental one
        #[arg(long)]
        full: bool,

        /// Base of an incremental snapshot; defaults to the newest one
        #[arg(long, conflicts_with = "full")]
        base: Option<String>,

        /// Path to back up (repeatable)
        #[arg(long, required = true)]
        include: Vec<String>,

        /// Path to leave out (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Upgrade one snapshot, or every snapshot in the target
    Upgrade {
        #[arg(long)]
        name: Option<String>,

        #[arg(long, default_value = "1.5")]
        to: String,
    },

    /// Downgrade one snapshot to an older layout
    Downgrade {
        #[arg(long)]
        name: String,

        #[arg(long)]
        to: String,
    },

    /// Re-point an incremental snapshot at an older base
    Rebase { target: String, new_base: String },

    /// Delete a snapshot, re-parenting its children
    Remove { name: String },

    /// Apply the retention policy
    Purge {
        /// Policy (simple, log); defaults to the configured one
        #[arg(long)]
        policy: Option<String>,

        #[arg(long)]
        max_age_days: Option<i64>,
    },

    /// Show which snapshots hold a path, or restore it
    Revert {
        name: String,
        path: String,

        /// Extract into this directory instead of printing the plan
        #[arg(long, value_name = "DIR")]
        into: Option<PathBuf>,

        /// Keep files that would be overwritten, with this suffix
        #[arg(long, requires = "into")]
        backup_suffix: Option<String>,
    },

    /// Dump the records of a snar file as JSON lines
    Snar { file: PathBuf },
}

fn date_filter(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    on: Option<NaiveDate>,
) -> Result<ListFilter> {
    if let Some(day) = on {
        return Ok(ListFilter::OnDate(day));
    }
    if from.is_none() && to.is_none() {
        return Ok(ListFilter::All);
    }

    let from = from
        .unwrap_or(NaiveDate::MIN)
        .and_hms_opt(0, 0, 0)
        .context("invalid --from date")?;
    let to = to
        .unwrap_or(NaiveDate::MAX)
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .context("invalid --to date")?;
    Ok(ListFilter::DateRange { from, to })
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config::default()
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    if let Some(target) = args.target {
        config.target.dir = target;
    }
    let target_dir = config.target.dir.clone();
    let mut manager = SnapshotManager::new(&target_dir, config.archiver());

    match args.command {
        Command::List { json, from, to, on } => {
            let snapshots = manager.list(&date_filter(from, to, on)?)?;
            if json {
                let summaries: Vec<_> = snapshots.iter().map(|s| s.summary()).collect();
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for snapshot in &snapshots {
                    println!(
                        "{}\t{}\t{}\t{}",
                        snapshot.name(),
                        snapshot.version().map(|v| v.as_str()).unwrap_or("-"),
                        snapshot.compression(),
                        snapshot.base().map(|b| b.as_str()).unwrap_or("-"),
                    );
                }
            }
        }
        Command::Create {
            full,
            base,
            include,
            exclude,
        } => {
            let base = match (full, base) {
                (true, _) => None,
                (false, Some(base)) => Some(base),
                (false, None) => Some(
                    manager
                        .list(&ListFilter::All)?
                        .first()
                        .map(|s| s.name().to_string())
                        .context("no snapshot to base an incremental one on, use --full")?,
                ),
            };
            let kind = if full {
                SnapshotKind::Full
            } else {
                SnapshotKind::Incremental
            };

            let now = Local::now().naive_local();
            let mut snapshot = config.snapshot.start(&target_dir, kind, now)?;
            if let Some(base) = &base {
                snapshot.set_base(base)?;
            }
            for path in &include {
                snapshot.add_include(path)?;
            }
            for path in &exclude {
                snapshot.add_exclude(path)?;
            }
            snapshot.commit(manager.archiver())?;
            println!("{}", snapshot.name());
        }
        Command::Upgrade { name, to } => {
            let version: Version = to.parse()?;
            let upgrader = UpgradeManager::new();
            match name {
                Some(name) => {
                    let dir = upgrader.upgrade(&target_dir.join(name), version)?;
                    println!("{}", dir.display());
                }
                None => {
                    for dir in upgrader.upgrade_target(&target_dir)? {
                        println!("{}", dir.display());
                    }
                }
            }
        }
        Command::Downgrade { name, to } => {
            let version: Version = to.parse()?;
            UpgradeManager::new().downgrade(&target_dir.join(name), version)?;
        }
        Command::Rebase { target, new_base } => {
            manager.rebase(&target, &new_base)?;
        }
        Command::Remove { name } => {
            manager.remove(&name)?;
        }
        Command::Purge {
            policy,
            max_age_days,
        } => {
            if let Some(policy) = policy {
                config.purge.policy = policy;
            }
            if let Some(days) = max_age_days {
                config.purge.max_age_days = days;
            }
            for name in manager.purge(config.purge.policy()?)? {
                println!("{name}");
            }
        }
        Command::Revert {
            name,
            path,
            into,
            backup_suffix,
        } => match into {
            Some(dest) => {
                let layers = manager.restore(&name, &path, &dest, backup_suffix.as_deref())?;
                tracing::info!("Restored {} from {} layers", path, layers);
            }
            None => {
                for (snapshot, index) in manager.revert_state(&name, &path, None)? {
                    println!("{}", snapshot.display());
                    for file in index.iter_effective_files() {
                        println!("  {file}");
                    }
                }
            }
        },
        Command::Snar { file } => {
            let reader = snar::parse(&file)?;
            println!("{}", serde_json::to_string(reader.header())?);
            for record in reader {
                println!("{}", serde_json::to_string(&record?)?);
            }
        }
    }

    Ok(())
}
