use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::cache::SqliteStore;
use crate::config::{StoreBackend, StoreConfig};
use crate::memory::MemoryStore;
use crate::types::{Backup, Device, Task, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Persistence for devices, scheduled tasks, and backup records.
///
/// One implementation is chosen at startup (see [`open_store`]); every
/// component receives the same `Arc<dyn Store>`. Implementations must give
/// read-your-writes consistency: a status written by `claim_task` is visible
/// to the next `list_due_tasks` call.
#[async_trait]
pub trait Store: Send + Sync {
    // -- devices ------------------------------------------------------------

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError>;

    /// Resolve a device (and its credentials) by identifier.
    async fn lookup_device(&self, id: &str) -> Result<Option<Device>, StoreError>;

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError>;

    /// Remove a device. Its tasks and backup records are left in place.
    /// Returns `false` if it did not exist.
    async fn delete_device(&self, id: &str) -> Result<bool, StoreError>;

    // -- tasks --------------------------------------------------------------

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Returns `false` if the task did not exist.
    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Tasks with status `active` and `run_at <= now`, oldest first.
    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;

    /// Atomically move a task from `active` to `processing`.
    ///
    /// Returns `false` when the task is no longer active (another tick
    /// already claimed it, or it was edited in the meantime).
    async fn claim_task(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Store the outcome of a run.
    async fn record_task_result(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: &str,
    ) -> Result<(), StoreError>;

    /// Move `run_at` forward and reactivate the task. The last result is kept.
    async fn reschedule_task(&self, id: Uuid, next_run_at: DateTime<Utc>)
        -> Result<(), StoreError>;

    // -- backups ------------------------------------------------------------

    async fn insert_backup(&self, backup: &Backup) -> Result<(), StoreError>;

    async fn list_backups(&self) -> Result<Vec<Backup>, StoreError>;

    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>, StoreError>;

    /// Most recent regular backup (by `created_at`) for a device. Test
    /// backups are ignored.
    async fn latest_backup_for(&self, device_id: &str) -> Result<Option<Backup>, StoreError>;

    /// Delete a backup record. Returns `false` if it did not exist.
    async fn delete_backup(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete every test backup of a device and return the removed records.
    async fn delete_test_backups(&self, device_id: &str) -> Result<Vec<Backup>, StoreError>;
}

/// Open the store selected by configuration.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StoreBackend::Sqlite => {
            let path = config.expanded_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let db = SqliteStore::new(&path).await?;
            info!(path = %path.display(), "opened sqlite store");
            Ok(Arc::new(db))
        }
        StoreBackend::Memory => {
            info!("using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
