use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::types::{Backup, Credential, Device, Target, Task, TaskStatus};

/// Async SQLite-backed store for devices, tasks, and backups.
///
/// Timestamps are stored as Unix milliseconds so due-checks and "latest
/// backup" lookups compare numbers, never formatted strings.
pub struct SqliteStore {
    conn: Connection,
}

// ---------------------------------------------------------------------------
// helpers: enum / uuid / timestamp <-> SQLite
// ---------------------------------------------------------------------------

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    serde_json::to_value(val)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|e| conversion_error(idx, e))
}

fn uuid_from_sql(idx: usize, raw: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| conversion_error(idx, e))
}

fn ts_to_sql(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn ts_from_sql(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

const TASK_COLUMNS: &str = "id, title, command, device_id, run_at, kind, interval, until,
                            status, result, created_at, updated_at";

const BACKUP_COLUMNS: &str = "id, device_id, device_name, filename, size_bytes, created_at, is_test";

const DEVICE_COLUMNS: &str = "id, name, kind, host, port, username, auth, password";

impl SqliteStore {
    /// Open (or create) a database at the given file path.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn new_in_memory() -> Result<Self, tokio_rusqlite::Error> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), tokio_rusqlite::Error> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;

                    CREATE TABLE IF NOT EXISTS devices (
                        id        TEXT PRIMARY KEY,
                        name      TEXT NOT NULL,
                        kind      TEXT NOT NULL,
                        host      TEXT NOT NULL,
                        port      INTEGER NOT NULL DEFAULT 22,
                        username  TEXT NOT NULL,
                        auth      TEXT NOT NULL,
                        password  TEXT
                    );

                    CREATE TABLE IF NOT EXISTS tasks (
                        id          TEXT PRIMARY KEY,
                        title       TEXT NOT NULL,
                        command     TEXT NOT NULL,
                        device_id   TEXT NOT NULL,
                        run_at      INTEGER NOT NULL,
                        kind        TEXT NOT NULL,
                        interval    TEXT,
                        until       INTEGER,
                        status      TEXT NOT NULL,
                        result      TEXT,
                        created_at  INTEGER NOT NULL,
                        updated_at  INTEGER NOT NULL
                    );

                    CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(status, run_at);

                    CREATE TABLE IF NOT EXISTS backups (
                        id          TEXT PRIMARY KEY,
                        device_id   TEXT NOT NULL,
                        device_name TEXT NOT NULL,
                        filename    TEXT NOT NULL,
                        size_bytes  INTEGER,
                        created_at  INTEGER NOT NULL,
                        is_test     INTEGER NOT NULL DEFAULT 0
                    );

                    CREATE INDEX IF NOT EXISTS idx_backups_device ON backups(device_id, created_at);
                    ",
                )?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    async fn upsert_device(&self, device: &Device) -> Result<(), StoreError> {
        let id = device.id.clone();
        let name = device.name.clone();
        let kind = enum_to_sql(&device.kind);
        let host = device.target.host.clone();
        let port = device.target.port;
        let username = device.target.username.clone();
        let auth = enum_to_sql(&device.target.auth_mode());
        let password = match &device.target.credential {
            Credential::Password { password } => Some(password.clone()),
            Credential::Key => None,
        };

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO devices (id, name, kind, host, port, username, auth, password)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
                     ON CONFLICT(id) DO UPDATE SET
                        name=excluded.name, kind=excluded.kind, host=excluded.host,
                        port=excluded.port, username=excluded.username,
                        auth=excluded.auth, password=excluded.password",
                    rusqlite::params![id, name, kind, host, port, username, auth, password],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn lookup_device(&self, id: &str) -> Result<Option<Device>, StoreError> {
        let id = id.to_string();
        let device = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_device(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(device)
    }

    async fn list_devices(&self) -> Result<Vec<Device>, StoreError> {
        let devices = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {DEVICE_COLUMNS} FROM devices ORDER BY name"))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_device(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(devices)
    }

    async fn delete_device(&self, id: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM devices WHERE id = ?1", rusqlite::params![id])?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    async fn upsert_task(&self, task: &Task) -> Result<(), StoreError> {
        let id = task.id.to_string();
        let title = task.title.clone();
        let command = task.command.clone();
        let device_id = task.device_id.clone();
        let run_at = ts_to_sql(&task.run_at);
        let kind = enum_to_sql(&task.kind);
        let interval = task.interval.clone();
        let until = task.until.as_ref().map(ts_to_sql);
        let status = enum_to_sql(&task.status);
        let result = task.result.clone();
        let created_at = ts_to_sql(&task.created_at);
        let updated_at = ts_to_sql(&task.updated_at);

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO tasks (id, title, command, device_id, run_at, kind, interval,
                        until, status, result, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
                     ON CONFLICT(id) DO UPDATE SET
                        title=excluded.title, command=excluded.command,
                        device_id=excluded.device_id, run_at=excluded.run_at,
                        kind=excluded.kind, interval=excluded.interval, until=excluded.until,
                        status=excluded.status, result=excluded.result,
                        updated_at=excluded.updated_at",
                    rusqlite::params![
                        id, title, command, device_id, run_at, kind, interval, until, status,
                        result, created_at, updated_at,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let id_str = id.to_string();
        let task = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_task(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(task)
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let tasks = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY run_at"))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(tasks)
    }

    async fn delete_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM tasks WHERE id = ?1", rusqlite::params![id_str])?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn list_due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let now = ts_to_sql(&now);
        let active = enum_to_sql(&TaskStatus::Active);
        let tasks = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM tasks
                     WHERE status = ?1 AND run_at <= ?2 ORDER BY run_at"
                ))?;
                let mut rows = stmt.query(rusqlite::params![active, now])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_task(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(tasks)
    }

    async fn claim_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let active = enum_to_sql(&TaskStatus::Active);
        let processing = enum_to_sql(&TaskStatus::Processing);
        let updated_at = ts_to_sql(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                    rusqlite::params![processing, updated_at, id_str, active],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn record_task_result(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: &str,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let status = enum_to_sql(&status);
        let result = result.to_string();
        let updated_at = ts_to_sql(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE tasks SET status = ?1, result = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![status, result, updated_at, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    async fn reschedule_task(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id_str = id.to_string();
        let run_at = ts_to_sql(&next_run_at);
        let active = enum_to_sql(&TaskStatus::Active);
        let updated_at = ts_to_sql(&Utc::now());
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE tasks SET run_at = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
                    rusqlite::params![run_at, active, updated_at, id_str],
                )?;
                Ok(n)
            })
            .await?;
        if changed == 0 {
            return Err(StoreError::TaskNotFound(id));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Backups
    // -----------------------------------------------------------------------

    async fn insert_backup(&self, backup: &Backup) -> Result<(), StoreError> {
        let id = backup.id.to_string();
        let device_id = backup.device_id.clone();
        let device_name = backup.device_name.clone();
        let filename = backup.filename.clone();
        let size_bytes = backup.size_bytes.map(|s| s as i64);
        let created_at = ts_to_sql(&backup.created_at);
        let is_test = backup.is_test;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO backups (id, device_id, device_name, filename, size_bytes,
                        created_at, is_test)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    rusqlite::params![
                        id, device_id, device_name, filename, size_bytes, created_at, is_test,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn list_backups(&self) -> Result<Vec<Backup>, StoreError> {
        let backups = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_COLUMNS} FROM backups ORDER BY created_at DESC"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_backup(row)?);
                }
                Ok(out)
            })
            .await?;
        Ok(backups)
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<Backup>, StoreError> {
        let id_str = id.to_string();
        let backup = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id_str])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_backup(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(backup)
    }

    async fn latest_backup_for(&self, device_id: &str) -> Result<Option<Backup>, StoreError> {
        let device_id = device_id.to_string();
        let backup = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_COLUMNS} FROM backups
                     WHERE device_id = ?1 AND is_test = 0
                     ORDER BY created_at DESC LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![device_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_backup(row)?)),
                    None => Ok(None),
                }
            })
            .await?;
        Ok(backup)
    }

    async fn delete_backup(&self, id: Uuid) -> Result<bool, StoreError> {
        let id_str = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM backups WHERE id = ?1",
                    rusqlite::params![id_str],
                )?;
                Ok(n)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn delete_test_backups(&self, device_id: &str) -> Result<Vec<Backup>, StoreError> {
        let device_id = device_id.to_string();
        let removed = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut out = Vec::new();
                {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {BACKUP_COLUMNS} FROM backups WHERE device_id = ?1 AND is_test = 1"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![device_id])?;
                    while let Some(row) = rows.next()? {
                        out.push(row_to_backup(row)?);
                    }
                }
                tx.execute(
                    "DELETE FROM backups WHERE device_id = ?1 AND is_test = 1",
                    rusqlite::params![device_id],
                )?;
                tx.commit()?;
                Ok(out)
            })
            .await?;
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_device(row: &rusqlite::Row<'_>) -> rusqlite::Result<Device> {
    let kind_str: String = row.get(2)?;
    let auth_str: String = row.get(6)?;
    let password: Option<String> = row.get(7)?;

    let credential = match auth_str.as_str() {
        "key" => Credential::Key,
        _ => Credential::Password {
            password: password.unwrap_or_default(),
        },
    };

    Ok(Device {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: enum_from_sql(2, &kind_str)?,
        target: Target {
            host: row.get(3)?,
            port: row.get(4)?,
            username: row.get(5)?,
            credential,
        },
    })
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id_str: String = row.get(0)?;
    let kind_str: String = row.get(5)?;
    let until: Option<i64> = row.get(7)?;
    let status_str: String = row.get(8)?;

    Ok(Task {
        id: uuid_from_sql(0, &id_str)?,
        title: row.get(1)?,
        command: row.get(2)?,
        device_id: row.get(3)?,
        run_at: ts_from_sql(4, row.get(4)?)?,
        kind: enum_from_sql(5, &kind_str)?,
        interval: row.get(6)?,
        until: until.map(|ms| ts_from_sql(7, ms)).transpose()?,
        status: enum_from_sql(8, &status_str)?,
        result: row.get(9)?,
        created_at: ts_from_sql(10, row.get(10)?)?,
        updated_at: ts_from_sql(11, row.get(11)?)?,
    })
}

fn row_to_backup(row: &rusqlite::Row<'_>) -> rusqlite::Result<Backup> {
    let id_str: String = row.get(0)?;
    let size_bytes: Option<i64> = row.get(4)?;

    Ok(Backup {
        id: uuid_from_sql(0, &id_str)?,
        device_id: row.get(1)?,
        device_name: row.get(2)?,
        filename: row.get(3)?,
        size_bytes: size_bytes.map(|s| s.max(0) as u64),
        created_at: ts_from_sql(5, row.get(5)?)?,
        is_test: row.get(6)?,
    })
}
