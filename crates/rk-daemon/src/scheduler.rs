use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rk_core::clock::Clock;
use rk_core::config::SchedulerConfig;
use rk_core::interval::{effective_interval, IntervalError};
use rk_core::store::{Store, StoreError};
use rk_core::types::{Task, TaskStatus};
use rk_session::{CommandExecutor, SessionError};
use rk_telemetry::metrics::{global_metrics, SCHEDULED_TASKS_TOTAL};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error("device {device_id} for task {task_id} not found")]
    DeviceNotFound { task_id: Uuid, device_id: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Text stored as a task's result when its command failed.
pub fn failure_result(err: &SessionError) -> String {
    format!(
        "Error: {err}\nPartial Output: {}",
        err.partial_output().unwrap_or_default()
    )
}

/// Next `run_at` for a recurring task: previous `run_at` plus its interval
/// (raised to `floor`). `None` for non-recurring tasks or once `until` has
/// passed.
pub fn next_run_at(task: &Task, floor: Duration) -> Result<Option<DateTime<Utc>>, IntervalError> {
    let Some(raw) = task.interval.as_deref().filter(|_| task.is_recurring()) else {
        return Ok(None);
    };
    let step = effective_interval(raw, floor)?;
    let next = chrono::Duration::from_std(step)
        .ok()
        .and_then(|step| task.run_at.checked_add_signed(step))
        .ok_or_else(|| IntervalError::TooLarge(raw.to_string()))?;
    Ok(match task.until {
        Some(until) if next > until => None,
        _ => Some(next),
    })
}

/// Polls the store for due tasks and runs them through the executor.
///
/// Each due task is claimed (active → processing) before dispatch so a task
/// seen by two overlapping ticks runs once. Dispatches run concurrently,
/// gated by a [`Semaphore`] of `max_concurrent` permits; tasks over the cap
/// wait rather than being dropped.
pub struct TaskScheduler {
    store: Arc<dyn Store>,
    executor: Arc<CommandExecutor>,
    clock: Arc<dyn Clock>,
    gate: Arc<Semaphore>,
    min_interval: Duration,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        executor: Arc<CommandExecutor>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            clock,
            gate: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            min_interval: Duration::from_secs(config.min_interval_secs),
        }
    }

    /// Dispatch slots currently free.
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Claim every due task and spawn its dispatch onto `work`.
    ///
    /// Returns the number of tasks claimed by this call.
    pub async fn run_due(self: &Arc<Self>, work: &mut JoinSet<()>) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let due = self.store.list_due_tasks(now).await?;
        if due.is_empty() {
            debug!("no due tasks");
            return Ok(0);
        }

        let mut claimed = 0;
        for task in due {
            match self.store.claim_task(task.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(task_id = %task.id, "task already claimed, skipping");
                    continue;
                }
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "failed to claim task");
                    continue;
                }
            }
            claimed += 1;
            let this = Arc::clone(self);
            work.spawn(async move { this.dispatch(task).await });
        }

        info!(claimed, free_slots = self.available_slots(), "scheduler tick dispatched tasks");
        Ok(claimed)
    }

    /// Run one tick and wait for every dispatch it started.
    pub async fn tick(self: &Arc<Self>) -> Result<usize, StoreError> {
        let mut work = JoinSet::new();
        let claimed = self.run_due(&mut work).await?;
        while let Some(joined) = work.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "task dispatch panicked");
            }
        }
        Ok(claimed)
    }

    /// Execute one claimed task and persist its outcome. Never fails: errors
    /// are logged and counted.
    pub async fn dispatch(&self, task: Task) {
        let Ok(_permit) = self.gate.clone().acquire_owned().await else {
            warn!(task_id = %task.id, "dispatch gate closed");
            return;
        };

        let outcome = match self.execute(&task).await {
            Ok(status) => status.as_str(),
            Err(SchedulingError::DeviceNotFound { .. }) => "device_missing",
            Err(SchedulingError::Store(_)) => "store_error",
        };
        global_metrics().increment_counter(SCHEDULED_TASKS_TOTAL, &[("outcome", outcome)]);
    }

    async fn execute(&self, task: &Task) -> Result<TaskStatus, SchedulingError> {
        let device = match self.store.lookup_device(&task.device_id).await {
            Ok(Some(device)) => device,
            Ok(None) => {
                let err = SchedulingError::DeviceNotFound {
                    task_id: task.id,
                    device_id: task.device_id.clone(),
                };
                error!(task_id = %task.id, device_id = %task.device_id, "task device not found");
                self.store
                    .record_task_result(task.id, TaskStatus::Error, &format!("Error: {err}"))
                    .await?;
                return Err(err);
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "device lookup failed");
                if let Err(record_err) = self
                    .store
                    .record_task_result(task.id, TaskStatus::Error, &format!("Error: {e}"))
                    .await
                {
                    warn!(task_id = %task.id, error = %record_err, "could not record lookup failure");
                }
                return Err(e.into());
            }
        };

        info!(
            task_id = %task.id,
            title = %task.title,
            device = %device.name,
            "running scheduled task"
        );

        let (status, result) = match self.executor.run(&device.target, &task.command).await {
            Ok(stdout) => (TaskStatus::Completed, stdout),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "scheduled task failed");
                (TaskStatus::Error, failure_result(&e))
            }
        };

        let next = match next_run_at(task, self.min_interval) {
            Ok(next) => next,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "recurring task cannot be rescheduled");
                let result = format!("Error: {e}\nOutput: {result}");
                self.store
                    .record_task_result(task.id, TaskStatus::Error, &result)
                    .await?;
                return Ok(TaskStatus::Error);
            }
        };
        self.store.record_task_result(task.id, status, &result).await?;

        match next {
            Some(next) => {
                self.store.reschedule_task(task.id, next).await?;
                info!(task_id = %task.id, next_run_at = %next, "recurring task rescheduled");
                Ok(TaskStatus::Active)
            }
            None => {
                if task.is_recurring() {
                    info!(task_id = %task.id, "recurring task passed its end time");
                }
                Ok(status)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn next_run_adds_interval_to_previous_run_at() {
        let task = Task::recurring("t", "/ping", "r1", at(10, 0), "1h30m");
        assert_eq!(
            next_run_at(&task, Duration::from_secs(60)),
            Ok(Some(at(11, 30)))
        );
    }

    #[test]
    fn next_run_respects_until() {
        let task = Task::recurring("t", "/ping", "r1", at(10, 0), "1h").with_until(at(10, 30));
        assert_eq!(next_run_at(&task, Duration::from_secs(60)), Ok(None));

        let task = Task::recurring("t", "/ping", "r1", at(10, 0), "1h").with_until(at(11, 0));
        assert_eq!(next_run_at(&task, Duration::from_secs(60)), Ok(Some(at(11, 0))));
    }

    #[test]
    fn malformed_interval_uses_floor() {
        let task = Task::recurring("t", "/ping", "r1", at(10, 0), "every day");
        assert_eq!(next_run_at(&task, Duration::from_secs(300)), Ok(Some(at(10, 5))));
    }

    #[test]
    fn oversized_interval_has_no_next_run() {
        let task = Task::recurring("t", "/ping", "r1", at(10, 0), "1e20");
        assert!(matches!(
            next_run_at(&task, Duration::from_secs(60)),
            Err(IntervalError::TooLarge(_))
        ));
    }

    #[test]
    fn single_tasks_never_recur() {
        let task = Task::single("t", "/ping", "r1", at(10, 0));
        assert_eq!(next_run_at(&task, Duration::from_secs(60)), Ok(None));
    }

    #[test]
    fn failure_text_includes_partial_output() {
        let err = SessionError::RemoteExec {
            exit_status: 2,
            stdout: "partial".into(),
            stderr: String::new(),
        };
        let text = failure_result(&err);
        assert!(text.starts_with("Error: remote command exited with status 2"));
        assert!(text.ends_with("\nPartial Output: partial"));

        let err = SessionError::Timeout {
            after: Duration::from_secs(1),
        };
        assert!(failure_result(&err).ends_with("Partial Output: "));
    }
}
