use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rk_core::clock::Clock;
use rk_core::config::{BackupConfig, MAX_THRESHOLD_MINS};
use rk_core::store::{Store, StoreError};
use rk_core::types::{local_backup_path, Backup, Device};
use rk_session::{CommandExecutor, FileRetriever, SessionError};
use rk_telemetry::metrics::{global_metrics, BACKUPS_TOTAL};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::retention::{self, RetentionReport};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("no backup command configured for device kind {kind}")]
    NoCommand { kind: String },
    #[error("device id {id:?} cannot be used as a backup directory name")]
    UnsafeDeviceId { id: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stem of the file written by a connection test.
pub const TEST_BACKUP_STEM: &str = "test_connection";

/// `<prefix>_auto_YYYYMMDD_HHMM.backup` in UTC.
pub fn backup_filename(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{}.backup", backup_stem(prefix, at))
}

fn backup_stem(prefix: &str, at: DateTime<Utc>) -> String {
    format!("{prefix}_auto_{}", at.format("%Y%m%d_%H%M"))
}

/// True when the device has never been backed up or its newest backup is
/// strictly older than `threshold`.
pub fn needs_backup(latest: Option<&Backup>, now: DateTime<Utc>, threshold: Duration) -> bool {
    match latest {
        None => true,
        Some(backup) => backup.age(now) > threshold,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum DeviceOutcome {
    Created,
    Skipped,
    Failed,
}

/// Periodic per-device backups followed by a retention pass.
pub struct BackupAutomation {
    store: Arc<dyn Store>,
    executor: Arc<CommandExecutor>,
    retriever: Arc<FileRetriever>,
    clock: Arc<dyn Clock>,
    config: BackupConfig,
    gate: Arc<Semaphore>,
    running: AtomicBool,
}

impl BackupAutomation {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<CommandExecutor>,
        retriever: Arc<FileRetriever>,
        clock: Arc<dyn Clock>,
        config: BackupConfig,
    ) -> Self {
        let gate = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            store,
            executor,
            retriever,
            clock,
            config,
            gate,
            running: AtomicBool::new(false),
        }
    }

    fn threshold(&self) -> Duration {
        Duration::minutes(self.config.threshold_mins.min(MAX_THRESHOLD_MINS) as i64)
    }

    fn template_for(&self, device: &Device) -> Result<&str, BackupError> {
        self.config
            .command_template(&device.kind)
            .ok_or_else(|| BackupError::NoCommand {
                kind: device.kind.as_str().to_string(),
            })
    }

    fn local_dir(&self) -> Option<PathBuf> {
        self.config
            .download
            .then(|| self.config.expanded_backup_dir())
    }

    /// One sweep and, when enabled, one retention pass. A pass that starts
    /// while the previous one is still running is skipped and returns `None`.
    pub async fn run_pass(self: &Arc<Self>) -> Option<(SweepReport, Option<RetentionReport>)> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("previous backup pass still running, skipping");
            return None;
        }

        let sweep = self.sweep().await;
        let retention = if self.config.retention {
            let dir = self.local_dir();
            match retention::apply(self.store.as_ref(), dir.as_deref(), self.clock.now()).await {
                Ok(report) => Some(report),
                Err(e) => {
                    error!(error = %e, "retention pass failed");
                    None
                }
            }
        } else {
            None
        };

        self.running.store(false, Ordering::Release);
        Some((sweep, retention))
    }

    /// Back up every device whose latest backup is missing or older than the
    /// threshold. Devices are handled concurrently; one failure never stops
    /// the others.
    pub async fn sweep(self: &Arc<Self>) -> SweepReport {
        let devices = match self.store.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "cannot list devices for backup sweep");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            examined: devices.len(),
            ..Default::default()
        };
        let mut work = JoinSet::new();
        for device in devices {
            let this = Arc::clone(self);
            work.spawn(async move { this.sweep_device(device).await });
        }

        while let Some(joined) = work.join_next().await {
            match joined {
                Ok(DeviceOutcome::Created) => report.created += 1,
                Ok(DeviceOutcome::Skipped) => report.skipped += 1,
                Ok(DeviceOutcome::Failed) => report.failed += 1,
                Err(e) => {
                    error!(error = %e, "backup worker panicked");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            created = report.created,
            skipped = report.skipped,
            failed = report.failed,
            "backup sweep complete"
        );
        report
    }

    async fn sweep_device(&self, device: Device) -> DeviceOutcome {
        let Ok(_permit) = self.gate.clone().acquire_owned().await else {
            return DeviceOutcome::Failed;
        };

        let latest = match self.store.latest_backup_for(&device.id).await {
            Ok(latest) => latest,
            Err(e) => {
                warn!(device = %device.name, error = %e, "cannot read latest backup");
                return DeviceOutcome::Failed;
            }
        };
        if !needs_backup(latest.as_ref(), self.clock.now(), self.threshold()) {
            debug!(device = %device.name, "recent backup exists");
            return DeviceOutcome::Skipped;
        }

        match self.backup_device(&device).await {
            Ok(_) => {
                global_metrics().increment_counter(BACKUPS_TOTAL, &[("outcome", "created")]);
                DeviceOutcome::Created
            }
            Err(e) => {
                warn!(device = %device.name, device_id = %device.id, error = %e, "backup failed");
                global_metrics().increment_counter(BACKUPS_TOTAL, &[("outcome", "failed")]);
                DeviceOutcome::Failed
            }
        }
    }

    /// Save a backup on the device and record it, regardless of how recent
    /// its latest backup is.
    ///
    /// With downloads enabled the file is then copied to
    /// `<backup_dir>/<device_id>/<filename>`. A failed download is logged and
    /// the record is still stored, without a size.
    pub async fn backup_device(&self, device: &Device) -> Result<Backup, BackupError> {
        let template = self.template_for(device)?;

        let now = self.clock.now();
        let stem = backup_stem(&self.config.filename_prefix, now);
        let command = template.replace("{name}", &stem);
        self.executor.run(&device.target, &command).await?;

        let mut backup = Backup::new(device, format!("{stem}.backup"), now);
        if let Some(dir) = self.local_dir() {
            match backup.local_path(&dir) {
                Some(local) => match self
                    .retriever
                    .download(&device.target, &backup.filename, &local)
                    .await
                {
                    Ok(bytes) => backup.size_bytes = Some(bytes),
                    Err(e) => {
                        warn!(device = %device.name, error = %e, "backup saved but download failed");
                    }
                },
                None => {
                    warn!(device_id = %device.id, "device id is not a plain name, skipping download");
                }
            }
        }

        self.store.insert_backup(&backup).await?;
        info!(
            device = %device.name,
            filename = %backup.filename,
            size = ?backup.size_bytes,
            "backup recorded"
        );
        Ok(backup)
    }

    /// Check that a device can be backed up end to end.
    ///
    /// Earlier test backups of the device are dropped, then
    /// `test_connection.backup` is saved, downloaded to
    /// `<backup_dir>/<device_id>/` and recorded with `is_test` set. The
    /// download always runs and its failure fails the test; nothing is
    /// recorded then.
    pub async fn test_backup(&self, device: &Device) -> Result<Backup, BackupError> {
        let template = self.template_for(device)?;
        let filename = format!("{TEST_BACKUP_STEM}.backup");
        let local = local_backup_path(&self.config.expanded_backup_dir(), &device.id, &filename)
            .ok_or_else(|| BackupError::UnsafeDeviceId {
                id: device.id.clone(),
            })?;

        let replaced = self.store.delete_test_backups(&device.id).await?;
        debug!(device = %device.name, replaced = replaced.len(), "cleared earlier test backups");

        let result = async {
            self.executor
                .run(&device.target, &template.replace("{name}", TEST_BACKUP_STEM))
                .await?;
            self.retriever
                .download(&device.target, &filename, &local)
                .await
        }
        .await;
        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                global_metrics().increment_counter(BACKUPS_TOTAL, &[("outcome", "test_failed")]);
                return Err(e.into());
            }
        };

        let mut backup = Backup::new(device, filename, self.clock.now());
        backup.size_bytes = Some(bytes);
        backup.is_test = true;
        self.store.insert_backup(&backup).await?;
        global_metrics().increment_counter(BACKUPS_TOTAL, &[("outcome", "test")]);
        info!(device = %device.name, size = bytes, path = %local.display(), "test backup recorded");
        Ok(backup)
    }

    /// Delete a backup record and its downloaded copy, if any. Returns the
    /// removed record, or `None` when no backup has this id.
    pub async fn delete_backup(&self, id: Uuid) -> Result<Option<Backup>, BackupError> {
        let Some(backup) = self.store.get_backup(id).await? else {
            return Ok(None);
        };
        if !self.store.delete_backup(id).await? {
            return Ok(None);
        }
        retention::remove_local_copy(&self.config.expanded_backup_dir(), &backup).await;
        info!(backup_id = %id, device = %backup.device_name, filename = %backup.filename, "backup deleted");
        Ok(Some(backup))
    }
}
