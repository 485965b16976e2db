mod support;

use std::sync::Arc;
use std::time::Duration;

use rk_core::clock::Clock;
use rk_core::config::{Config, StoreBackend, TransportMode};
use rk_core::types::{Task, TaskStatus};
use rk_daemon::daemon::{Daemon, DaemonIntervals};

use support::{device, Harness, ScriptedConnector};

fn quick_intervals() -> DaemonIntervals {
    DaemonIntervals {
        scheduler_secs: 1,
        backup_secs: 3600,
        pool_sweep_secs: 3600,
        drain_secs: 2,
    }
}

#[tokio::test]
async fn startup_backup_pass_runs_and_shutdown_drains() {
    let connector = ScriptedConnector::new();
    let h = Harness::new(connector.clone());
    h.store.upsert_device(&device("r1", "10.0.0.1")).await.unwrap();

    let mut daemon = Daemon::with_parts(
        Config::default(),
        h.store.clone(),
        connector.clone(),
        h.clock.clone(),
    );
    daemon.set_intervals(quick_intervals());
    let daemon = Arc::new(daemon);

    let runner = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run().await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    daemon.shutdown();

    let finished = tokio::time::timeout(Duration::from_secs(5), runner).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))));

    let backups = h.store.list_backups().await.unwrap();
    assert_eq!(backups.len(), 1);
    assert_eq!(backups[0].created_at, h.clock.now());
    assert!(daemon.pool().is_empty());
}

#[tokio::test]
async fn scheduler_tick_runs_due_tasks() {
    let connector = ScriptedConnector::new();
    let h = Harness::new(connector.clone());
    h.store.upsert_device(&device("r1", "10.0.0.1")).await.unwrap();
    let task = Task::single("ping", "/ping 8.8.8.8", "r1", h.clock.now());
    h.store.upsert_task(&task).await.unwrap();

    let mut config = Config::default();
    config.backup.enabled = false;
    let mut daemon = Daemon::with_parts(config, h.store.clone(), connector.clone(), h.clock.clone());
    daemon.set_intervals(quick_intervals());
    let daemon = Arc::new(daemon);

    let runner = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run().await })
    };
    tokio::time::sleep(Duration::from_millis(1500)).await;
    daemon.shutdown();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let stored = h.store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Completed);
    assert!(h.store.list_backups().await.unwrap().is_empty());
    assert_eq!(connector.commands(), vec![("10.0.0.1".to_string(), "/ping 8.8.8.8".to_string())]);
}

#[tokio::test]
async fn new_opens_memory_store_with_simulated_transport() {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Memory;
    config.transport.mode = TransportMode::Simulated;

    let daemon = Daemon::new(config).await.unwrap();
    assert!(daemon.store().list_devices().await.unwrap().is_empty());

    daemon.store().upsert_device(&device("r1", "10.0.0.1")).await.unwrap();
    let out = daemon
        .executor()
        .run(&device("r1", "10.0.0.1").target, "/interface print")
        .await
        .unwrap();
    assert_eq!(out, "[10.0.0.1:22] /interface print\n");
}

#[tokio::test]
async fn shutdown_before_run_exits_promptly() {
    let connector = ScriptedConnector::new();
    let h = Harness::new(connector.clone());
    let mut config = Config::default();
    config.backup.enabled = false;
    config.scheduler.enabled = false;
    let mut daemon = Daemon::with_parts(config, h.store.clone(), connector, h.clock.clone());
    daemon.set_intervals(quick_intervals());
    let daemon = Arc::new(daemon);

    let handle = daemon.shutdown_handle();
    let runner = {
        let daemon = daemon.clone();
        tokio::spawn(async move { daemon.run().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.trigger();
    assert!(tokio::time::timeout(Duration::from_secs(2), runner).await.is_ok());
}
