use std::sync::Arc;
use std::time::{Duration, Instant};

use rk_core::config::ExecutorConfig;
use rk_core::types::Target;
use rk_telemetry::metrics::{global_metrics, REMOTE_COMMANDS_TOTAL, REMOTE_COMMAND_DURATION};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::pool::SessionPool;

/// Runs single commands on targets through the shared pool.
pub struct CommandExecutor {
    pool: Arc<SessionPool>,
    timeout: Duration,
}

impl CommandExecutor {
    pub fn new(pool: Arc<SessionPool>, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn from_config(pool: Arc<SessionPool>, config: &ExecutorConfig) -> Self {
        Self::new(pool, Duration::from_secs(config.command_timeout_secs))
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        &self.pool
    }

    /// Run `command` on `target` and return its stdout.
    ///
    /// A channel-open failure on a cached session evicts it and the whole
    /// operation is retried once on a fresh dial. Non-zero exit yields
    /// [`SessionError::RemoteExec`] carrying whatever output was captured.
    /// The entire call, retry included, is bounded by the configured deadline.
    pub async fn run(&self, target: &Target, command: &str) -> Result<String, SessionError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.run_with_retry(target, command))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout {
                after: self.timeout,
            }),
        };

        let metrics = global_metrics();
        metrics.record_histogram(REMOTE_COMMAND_DURATION, started.elapsed().as_secs_f64());
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.outcome(),
        };
        metrics.increment_counter(REMOTE_COMMANDS_TOTAL, &[("outcome", outcome)]);

        result
    }

    async fn run_with_retry(&self, target: &Target, command: &str) -> Result<String, SessionError> {
        match self.run_once(target, command).await {
            Err(SessionError::StaleSession { reason, .. }) => {
                warn!(peer = %target.key(), reason = %reason, "stale session, retrying once on a fresh dial");
                self.run_once(target, command).await
            }
            other => other,
        }
    }

    async fn run_once(&self, target: &Target, command: &str) -> Result<String, SessionError> {
        let lease = self.pool.acquire(target).await?;
        debug!(peer = %lease.key(), serial = lease.serial(), command, "exec");

        match lease.session().exec(command).await {
            Ok(output) => output.into_result(),
            Err(err @ SessionError::StaleSession { .. }) => {
                self.pool.evict(&lease).await;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }
}
