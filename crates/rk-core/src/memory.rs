use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::types::{Backup, Device, Task, TaskStatus};

/// Volatile store kept entirely in process memory.
///
/// Used for tests and for the simulated demo mode. Each table sits behind its
/// own `RwLock`; `claim_task` takes the write lock so the active→processing
/// check-and-set is atomic.
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, Device>>,
    tasks: RwLock<HashMap<Uuid, Task>>,
    backups: RwLock<HashMap<Uuid, Backup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device.clone());
        Ok(())
    }

    async fn lookup_device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        Ok(self.devices.read().await.get(id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let mut out: Vec<Device> = self.devices.read().await.values().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn delete_device(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.devices.write().await.remove(id).is_some())
    }

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let mut out: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        out.sort_by_key(|t| t.run_at);
        Ok(out)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(&id).is_some())
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let mut out: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        out.sort_by_key(|t| t.run_at);
        Ok(out)
    }

    async fn claim_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Active => {
                task.status = TaskStatus::Processing;
                task.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) | None => Ok(false),
        }
    }

    async fn record_task_result(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: &str,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.status = status;
        task.result = Some(result.to_string());
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule_task(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
        task.run_at = next_run_at;
        task.status = TaskStatus::Active;
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_backup(&self, backup: &Backup) -> Result<(), StoreError> {
        self.backups.write().await.insert(backup.id, backup.clone());
        Ok(())
    }

    async fn list_backups(&self) -> Result<Vec<Backup>, StoreError> {
        let mut out: Vec<Backup> = self.backups.read().await.values().cloned().collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>, StoreError> {
        Ok(self.backups.read().await.get(&id).cloned())
    }

    async fn latest_backup_for(&self, device_id: &str) -> Result<Option<Backup>, StoreError> {
        Ok(self
            .backups
            .read()
            .await
            .values()
            .filter(|b| b.device_id == device_id && !b.is_test)
            .max_by_key(|b| b.created_at)
            .cloned())
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.backups.write().await.remove(&id).is_some())
    }

    async fn delete_test_backups(&self, device_id: &str) -> Result<Vec<Backup>, StoreError> {
        let mut backups = self.backups.write().await;
        let ids: Vec<Uuid> = backups
            .values()
            .filter(|b| b.device_id == device_id && b.is_test)
            .map(|b| b.id)
            .collect();
        Ok(ids.iter().filter_map(|id| backups.remove(id)).collect())
    }
}
