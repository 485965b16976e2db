use chrono::{Duration, TimeZone, Utc};
use rk_core::cache::SqliteStore;
use rk_core::config::{StoreBackend, StoreConfig};
use rk_core::memory::MemoryStore;
use rk_core::store::{open_store, Store, StoreError};
use rk_core::types::*;
use uuid::Uuid;

fn router(id: &str) -> Device {
    Device::new(
        id,
        format!("router-{id}"),
        DeviceKind::Mikrotik,
        Target::with_password("10.0.0.1", "admin", "secret").on_port(2222),
    )
}

async fn stores() -> Vec<(&'static str, Box<dyn Store>)> {
    vec![
        (
            "sqlite",
            Box::new(SqliteStore::new_in_memory().await.expect("in-memory sqlite")) as Box<dyn Store>,
        ),
        ("memory", Box::new(MemoryStore::new())),
    ]
}

#[tokio::test]
async fn device_upsert_and_lookup() {
    for (name, store) in stores().await {
        let device = router("r1");
        store.upsert_device(&device).await.unwrap();

        let fetched = store
            .lookup_device("r1")
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("{name}: device should exist"));
        assert_eq!(fetched, device, "{name}");

        assert!(store.lookup_device("missing").await.unwrap().is_none(), "{name}");
    }
}

#[tokio::test]
async fn key_auth_device_roundtrip() {
    for (name, store) in stores().await {
        let device = Device::new(
            "olt-1",
            "olt",
            DeviceKind::Olt,
            Target::with_key("10.0.0.9", "root"),
        );
        store.upsert_device(&device).await.unwrap();
        let fetched = store.lookup_device("olt-1").await.unwrap().unwrap();
        assert_eq!(fetched.target.credential, Credential::Key, "{name}");
        assert_eq!(fetched.kind, DeviceKind::Olt, "{name}");
    }
}

#[tokio::test]
async fn list_devices_sorted_by_name() {
    for (name, store) in stores().await {
        store.upsert_device(&router("b")).await.unwrap();
        store.upsert_device(&router("a")).await.unwrap();
        let ids: Vec<String> = store
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()], "{name}");
    }
}

#[tokio::test]
async fn due_tasks_filter_on_status_and_time() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for (name, store) in stores().await {
        let due = Task::single("due", "/ping", "r1", now - Duration::minutes(1));
        let future = Task::single("later", "/ping", "r1", now + Duration::minutes(1));
        let mut done = Task::single("done", "/ping", "r1", now - Duration::hours(1));
        done.status = TaskStatus::Completed;

        for t in [&due, &future, &done] {
            store.upsert_task(t).await.unwrap();
        }

        let listed = store.list_due_tasks(now).await.unwrap();
        assert_eq!(listed.len(), 1, "{name}");
        assert_eq!(listed[0].id, due.id, "{name}");
        assert_eq!(
            listed[0].run_at.timestamp_millis(),
            due.run_at.timestamp_millis(),
            "{name}"
        );

        let exactly_now = Task::single("edge", "/ping", "r1", now);
        store.upsert_task(&exactly_now).await.unwrap();
        assert_eq!(store.list_due_tasks(now).await.unwrap().len(), 2, "{name}");
    }
}

#[tokio::test]
async fn claim_is_exclusive() {
    for (name, store) in stores().await {
        let task = Task::single("claim", "/ping", "r1", Utc::now());
        store.upsert_task(&task).await.unwrap();

        assert!(store.claim_task(task.id).await.unwrap(), "{name}");
        assert!(!store.claim_task(task.id).await.unwrap(), "{name}");
        assert!(!store.claim_task(Uuid::new_v4()).await.unwrap(), "{name}");

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Processing, "{name}");
        assert!(store.list_due_tasks(Utc::now()).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn record_and_reschedule_keep_latest_result() {
    for (name, store) in stores().await {
        let run_at = Utc.with_ymd_and_hms(2024, 5, 1, 11, 59, 0).unwrap();
        let task = Task::recurring("poll", "/interface print", "r1", run_at, "1h");
        store.upsert_task(&task).await.unwrap();
        store.claim_task(task.id).await.unwrap();

        store
            .record_task_result(task.id, TaskStatus::Completed, "ether1 up")
            .await
            .unwrap();
        let next = run_at + Duration::hours(1);
        store.reschedule_task(task.id, next).await.unwrap();

        let fetched = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Active, "{name}");
        assert_eq!(fetched.run_at, next, "{name}");
        assert_eq!(fetched.result.as_deref(), Some("ether1 up"), "{name}");
        assert_eq!(fetched.interval.as_deref(), Some("1h"), "{name}");
    }
}

#[tokio::test]
async fn updates_on_unknown_task_fail() {
    for (name, store) in stores().await {
        let id = Uuid::new_v4();
        let err = store
            .record_task_result(id, TaskStatus::Error, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(got) if got == id), "{name}");
        assert!(store.reschedule_task(id, Utc::now()).await.is_err(), "{name}");
    }
}

#[tokio::test]
async fn latest_backup_is_by_created_at() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for (name, store) in stores().await {
        let device = router("r1");
        let old = Backup::new(&device, "old.backup", now - Duration::days(2));
        let mut newest = Backup::new(&device, "new.backup", now);
        newest.size_bytes = Some(4096);
        let other = Backup::new(&router("r2"), "other.backup", now + Duration::hours(1));

        for b in [&newest, &old, &other] {
            store.insert_backup(b).await.unwrap();
        }

        let latest = store.latest_backup_for("r1").await.unwrap().unwrap();
        assert_eq!(latest.filename, "new.backup", "{name}");
        assert_eq!(latest.size_bytes, Some(4096), "{name}");
        assert!(store.latest_backup_for("nope").await.unwrap().is_none(), "{name}");

        let all = store.list_backups().await.unwrap();
        assert_eq!(all.len(), 3, "{name}");
        assert_eq!(all[0].filename, "other.backup", "{name}");
    }
}

#[tokio::test]
async fn delete_backup_reports_presence() {
    for (name, store) in stores().await {
        let backup = Backup::new(&router("r1"), "a.backup", Utc::now());
        store.insert_backup(&backup).await.unwrap();
        assert!(store.delete_backup(backup.id).await.unwrap(), "{name}");
        assert!(!store.delete_backup(backup.id).await.unwrap(), "{name}");
        assert!(store.list_backups().await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_backups_are_ignored_for_latest_and_cleared_per_device() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for (name, store) in stores().await {
        let r1 = router("r1");
        let regular = Backup::new(&r1, "auto.backup", now - Duration::hours(2));
        let mut test_file = Backup::new(&r1, "test_connection.backup", now);
        test_file.is_test = true;
        let mut other_test = Backup::new(&router("r2"), "test_connection.backup", now);
        other_test.is_test = true;
        for b in [&regular, &test_file, &other_test] {
            store.insert_backup(b).await.unwrap();
        }

        let latest = store.latest_backup_for("r1").await.unwrap().unwrap();
        assert_eq!(latest.id, regular.id, "{name}");
        assert!(store.latest_backup_for("r2").await.unwrap().is_none(), "{name}");

        let fetched = store.get_backup(test_file.id).await.unwrap().unwrap();
        assert!(fetched.is_test, "{name}");

        let removed = store.delete_test_backups("r1").await.unwrap();
        assert_eq!(removed.len(), 1, "{name}");
        assert_eq!(removed[0].id, test_file.id, "{name}");
        assert!(store.get_backup(test_file.id).await.unwrap().is_none(), "{name}");
        assert_eq!(store.list_backups().await.unwrap().len(), 2, "{name}");
        assert!(store.delete_test_backups("r1").await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn delete_device_and_task_report_presence() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for (name, store) in stores().await {
        store.upsert_device(&router("r1")).await.unwrap();
        let task = Task::single("reboot", "/system reboot", "r1", now);
        store.upsert_task(&task).await.unwrap();

        assert!(store.delete_task(task.id).await.unwrap(), "{name}");
        assert!(!store.delete_task(task.id).await.unwrap(), "{name}");
        assert!(store.get_task(task.id).await.unwrap().is_none(), "{name}");

        assert!(store.delete_device("r1").await.unwrap(), "{name}");
        assert!(!store.delete_device("r1").await.unwrap(), "{name}");
        assert!(store.list_devices().await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn open_store_creates_sqlite_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("rk.db");
    let config = StoreConfig {
        backend: StoreBackend::Sqlite,
        path: path.to_string_lossy().into_owned(),
    };

    let store = open_store(&config).await.expect("open sqlite store");
    store.upsert_device(&router("r1")).await.unwrap();
    assert!(path.exists());
    drop(store);

    let reopened = open_store(&config).await.expect("reopen");
    assert!(reopened.lookup_device("r1").await.unwrap().is_some());
}
