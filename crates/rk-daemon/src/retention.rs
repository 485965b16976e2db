//! Age-tiered pruning of stored backups.
//!
//! The younger a backup, the denser the history kept:
//!
//! | age (days)    | kept when created at           |
//! |---------------|--------------------------------|
//! | `<= 30`       | any hour                       |
//! | `<= 90`       | even hours                     |
//! | `<= 365`      | hours divisible by four        |
//! | `<= 1095`     | midnight                       |
//! | older         | midnight on a Sunday           |
//!
//! Bounds are inclusive and hours are read in UTC.

use std::io;
use std::path::Path;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use rk_core::store::{Store, StoreError};
use rk_core::types::Backup;
use rk_telemetry::metrics::{global_metrics, BACKUPS_PRUNED_TOTAL};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionTier {
    KeepAll,
    EveryTwoHours,
    EveryFourHours,
    Daily,
    Weekly,
}

impl RetentionTier {
    pub fn for_age(age: Duration) -> Self {
        if age <= Duration::days(30) {
            RetentionTier::KeepAll
        } else if age <= Duration::days(90) {
            RetentionTier::EveryTwoHours
        } else if age <= Duration::days(365) {
            RetentionTier::EveryFourHours
        } else if age <= Duration::days(1095) {
            RetentionTier::Daily
        } else {
            RetentionTier::Weekly
        }
    }

    /// Whether a backup created at `created_at` survives this tier.
    pub fn keeps(&self, created_at: DateTime<Utc>) -> bool {
        let hour = created_at.hour();
        match self {
            RetentionTier::KeepAll => true,
            RetentionTier::EveryTwoHours => hour % 2 == 0,
            RetentionTier::EveryFourHours => hour % 4 == 0,
            RetentionTier::Daily => hour == 0,
            RetentionTier::Weekly => hour == 0 && created_at.weekday() == Weekday::Sun,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionTier::KeepAll => "keep_all",
            RetentionTier::EveryTwoHours => "every_two_hours",
            RetentionTier::EveryFourHours => "every_four_hours",
            RetentionTier::Daily => "daily",
            RetentionTier::Weekly => "weekly",
        }
    }
}

pub fn should_keep(backup: &Backup, now: DateTime<Utc>) -> bool {
    RetentionTier::for_age(backup.age(now)).keeps(backup.created_at)
}

/// Regular backups that fail their tier's predicate, in input order. Test
/// backups are replaced by the next test run and never pruned here.
pub fn plan<'a>(backups: &'a [Backup], now: DateTime<Utc>) -> Vec<&'a Backup> {
    backups
        .iter()
        .filter(|b| !b.is_test && !should_keep(b, now))
        .collect()
}

/// Remove the downloaded copy of `backup` under `dir`. A missing file is not
/// an error; ids that would leave `dir` are refused.
pub(crate) async fn remove_local_copy(dir: &Path, backup: &Backup) {
    let Some(path) = backup.local_path(dir) else {
        warn!(
            backup_id = %backup.id,
            device_id = %backup.device_id,
            filename = %backup.filename,
            "backup path leaves the backup directory, not removing"
        );
        return;
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => debug!(path = %path.display(), "local backup file removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove local backup file"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("listing backups failed: {0}")]
    List(#[source] StoreError),
    #[error("deleting backup {id} failed: {source}")]
    Delete {
        id: Uuid,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub examined: usize,
    pub deleted: usize,
    pub errors: Vec<RetentionError>,
}

/// Prune the store. Deletions are independent: a failure is logged, kept in
/// the report, and the pass moves on.
///
/// With `backup_dir` set, the downloaded copy at
/// `<backup_dir>/<device_id>/<filename>` is removed too; a missing file is
/// not an error.
pub async fn apply(
    store: &dyn Store,
    backup_dir: Option<&Path>,
    now: DateTime<Utc>,
) -> Result<RetentionReport, RetentionError> {
    let backups = store.list_backups().await.map_err(RetentionError::List)?;
    let mut report = RetentionReport {
        examined: backups.len(),
        ..Default::default()
    };

    for backup in plan(&backups, now) {
        match store.delete_backup(backup.id).await {
            Ok(true) => {
                report.deleted += 1;
                debug!(
                    backup_id = %backup.id,
                    device = %backup.device_name,
                    filename = %backup.filename,
                    "backup pruned"
                );
            }
            Ok(false) => {
                debug!(backup_id = %backup.id, "backup already gone");
                continue;
            }
            Err(source) => {
                warn!(backup_id = %backup.id, error = %source, "failed to prune backup");
                report.errors.push(RetentionError::Delete {
                    id: backup.id,
                    source,
                });
                continue;
            }
        }

        if let Some(dir) = backup_dir {
            remove_local_copy(dir, backup).await;
        }
    }

    if report.deleted > 0 {
        global_metrics().increment_counter_by(BACKUPS_PRUNED_TOTAL, &[], report.deleted as u64);
    }
    info!(
        examined = report.examined,
        deleted = report.deleted,
        failed = report.errors.len(),
        "retention pass complete"
    );
    Ok(report)
}
