use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rk_core::clock::{Clock, SystemClock};
use rk_core::config::Config;
use rk_core::store::{open_store, Store};
use rk_session::transport::Connector;
use rk_session::{connector_for, CommandExecutor, FileRetriever, SessionPool};
use rk_telemetry::metrics::global_metrics;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backup::BackupAutomation;
use crate::scheduler::TaskScheduler;
use crate::shutdown::ShutdownSignal;

/// Loop periods for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// Due-task polling (default: 30s).
    pub scheduler_secs: u64,
    /// Backup sweep plus retention (default: 300s).
    pub backup_secs: u64,
    /// Dead-session sweep of the pool (default: 60s).
    pub pool_sweep_secs: u64,
    /// How long in-flight work may run after shutdown before it is aborted.
    pub drain_secs: u64,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            scheduler_secs: 30,
            backup_secs: 300,
            pool_sweep_secs: 60,
            drain_secs: 10,
        }
    }
}

impl DaemonIntervals {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler_secs: config.scheduler.tick_secs,
            backup_secs: config.backup.tick_secs,
            pool_sweep_secs: config.transport.pool_sweep_secs,
            ..Self::default()
        }
    }
}

/// The routerkeep background daemon.
///
/// Owns the session pool and drives the scheduler, backup automation and
/// pool sweep on their own timers until the [`ShutdownSignal`] fires.
pub struct Daemon {
    config: Config,
    store: Arc<dyn Store>,
    pool: Arc<SessionPool>,
    executor: Arc<CommandExecutor>,
    retriever: Arc<FileRetriever>,
    scheduler: Arc<TaskScheduler>,
    backups: Arc<BackupAutomation>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Open the configured store and pick the transport from config.
    pub async fn new(config: Config) -> Result<Self> {
        let store = open_store(&config.store)
            .await
            .context("failed to open store")?;

        let connector = connector_for(&config.transport, &config.security);

        Ok(Self::with_parts(config, store, connector, Arc::new(SystemClock)))
    }

    /// Assemble a daemon from explicit collaborators.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(connector));
        let executor = Arc::new(CommandExecutor::from_config(pool.clone(), &config.executor));
        let retriever = Arc::new(FileRetriever::new(pool.clone()));
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            executor.clone(),
            clock.clone(),
            &config.scheduler,
        ));
        let backups = Arc::new(BackupAutomation::new(
            store.clone(),
            executor.clone(),
            retriever.clone(),
            clock,
            config.backup.clone(),
        ));
        let intervals = DaemonIntervals::from_config(&config);

        Self {
            config,
            store,
            pool,
            executor,
            retriever,
            scheduler,
            backups,
            intervals,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn set_intervals(&mut self, intervals: DaemonIntervals) {
        self.intervals = intervals;
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn retriever(&self) -> &Arc<FileRetriever> {
        &self.retriever
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn backups(&self) -> &Arc<BackupAutomation> {
        &self.backups
    }

    /// Run until shutdown, then drain in-flight work and close the pool.
    pub async fn run(&self) -> Result<()> {
        let scheduler_enabled = self.config.scheduler.enabled;
        let backups_enabled = self.config.backup.enabled;
        info!(
            scheduler = scheduler_enabled,
            backups = backups_enabled,
            transport = ?self.config.transport.mode,
            "routerkeep daemon starting"
        );

        let mut sweep_interval = tokio::time::interval(secs(self.intervals.pool_sweep_secs));
        let mut scheduler_interval = tokio::time::interval(secs(self.intervals.scheduler_secs));
        let mut backup_interval = tokio::time::interval(secs(self.intervals.backup_secs));

        // The backup tick keeps its immediate first fire so a fresh start
        // backs up right away; the others wait one period.
        sweep_interval.tick().await;
        scheduler_interval.tick().await;

        let mut work: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = sweep_interval.tick() => {
                    let removed = self.pool.sweep().await;
                    debug!(removed, pooled = self.pool.len(), "pool sweep completed");
                }
                _ = scheduler_interval.tick(), if scheduler_enabled => {
                    if let Err(e) = self.scheduler.run_due(&mut work).await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = backup_interval.tick(), if backups_enabled => {
                    let backups = self.backups.clone();
                    work.spawn(async move {
                        backups.run_pass().await;
                    });
                }
                Some(joined) = work.join_next(), if !work.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "background unit panicked");
                    }
                }
                _ = self.shutdown.wait() => {
                    info!("shutdown signal received, stopping loops");
                    break;
                }
            }
        }

        self.drain(&mut work).await;
        self.pool.close_all().await;
        debug!(metrics = %global_metrics().export_prometheus(), "final metrics");
        info!("routerkeep daemon stopped");
        Ok(())
    }

    async fn drain(&self, work: &mut JoinSet<()>) {
        if work.is_empty() {
            return;
        }
        info!(in_flight = work.len(), "waiting for in-flight work");
        let deadline = secs(self.intervals.drain_secs);
        let drained = tokio::time::timeout(deadline, async {
            while work.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = work.len(), "drain deadline passed, aborting remaining work");
            work.abort_all();
            while work.join_next().await.is_some() {}
        }
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n.max(1))
}
