pub mod backups;
pub mod devices;
pub mod download;
pub mod prune;
pub mod run;
pub mod tasks;

use std::sync::Arc;

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use rk_core::clock::{Clock, SystemClock};
use rk_core::config::Config;
use rk_core::store::{open_store, Store};
use rk_core::types::Device;
use rk_session::transport::Connector;
use rk_daemon::backup::BackupAutomation;
use rk_session::{connector_for, CommandExecutor, FileRetriever, SessionPool};

/// Everything a subcommand needs, opened once per invocation.
pub struct Context {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub pool: Arc<SessionPool>,
    pub executor: Arc<CommandExecutor>,
    pub retriever: Arc<FileRetriever>,
    pub clock: Arc<dyn Clock>,
}

impl Context {
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config.store)
            .await
            .context("failed to open store")?;
        let connector = connector_for(&config.transport, &config.security);
        Ok(Self::with_parts(config, store, connector, Arc::new(SystemClock)))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<dyn Store>,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new(connector));
        Self {
            executor: Arc::new(CommandExecutor::from_config(pool.clone(), &config.executor)),
            retriever: Arc::new(FileRetriever::new(pool.clone())),
            config,
            store,
            pool,
            clock,
        }
    }

    /// Resolve a device or fail with a readable message.
    pub async fn device(&self, id: &str) -> anyhow::Result<Device> {
        self.store
            .lookup_device(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No device with id {id:?}. List devices with `rk devices list`."))
    }

    /// Backup automation over this context's store and sessions.
    pub fn backups(&self) -> BackupAutomation {
        BackupAutomation::new(
            self.store.clone(),
            self.executor.clone(),
            self.retriever.clone(),
            self.clock.clone(),
            self.config.backup.clone(),
        )
    }

    pub async fn close(&self) {
        self.pool.close_all().await;
    }
}

pub fn format_time(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Parse an RFC 3339 timestamp given on the command line.
pub fn parse_time(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("invalid timestamp {raw:?} (expected RFC 3339, e.g. 2024-05-06T12:00:00Z)"))
}
