use chrono::{DateTime, Utc};
use rk_core::clock::Clock;
use rk_core::interval::parse_interval;
use rk_core::types::{Task, TaskStatus};
use uuid::Uuid;

use super::{format_time, Context};

pub struct NewTask {
    pub title: String,
    pub device_id: String,
    pub command: String,
    /// Defaults to now.
    pub at: Option<DateTime<Utc>>,
    /// Makes the task recurring.
    pub every: Option<String>,
    pub until: Option<DateTime<Utc>>,
}

pub async fn add(ctx: &Context, new: NewTask) -> anyhow::Result<Task> {
    // Reject typos up front; the scheduler would otherwise fall back to its
    // minimum interval.
    ctx.device(&new.device_id).await?;
    let run_at = new.at.unwrap_or_else(|| ctx.clock.now());

    let mut task = match new.every {
        Some(every) => {
            parse_interval(&every)
                .map_err(|e| anyhow::anyhow!("invalid --every {every:?}: {e}"))?;
            Task::recurring(new.title, new.command, new.device_id, run_at, every)
        }
        None => Task::single(new.title, new.command, new.device_id, run_at),
    };
    if let Some(until) = new.until {
        if until < run_at {
            anyhow::bail!("--until is before the first run");
        }
        task = task.with_until(until);
    }

    ctx.store.upsert_task(&task).await?;
    Ok(task)
}

pub async fn list(ctx: &Context) -> anyhow::Result<String> {
    let tasks = ctx.store.list_tasks().await?;
    if tasks.is_empty() {
        return Ok("No tasks.\n".to_string());
    }
    let mut out = format!(
        "{:<36} {:<11} {:<24} {:<10} {:<12} {}\n",
        "ID", "STATUS", "RUN AT", "EVERY", "DEVICE", "TITLE"
    );
    for t in &tasks {
        out.push_str(&format!(
            "{:<36} {:<11} {:<24} {:<10} {:<12} {}\n",
            t.id,
            t.status.as_str(),
            format_time(t.run_at),
            t.interval.as_deref().unwrap_or("-"),
            t.device_id,
            t.title
        ));
    }
    Ok(out)
}

pub async fn show_result(ctx: &Context, id: Uuid) -> anyhow::Result<String> {
    let task = ctx
        .store
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No task with id {id}"))?;
    Ok(match task.result {
        Some(result) => format!("[{}] {}\n{result}\n", task.status, task.title),
        None => format!("[{}] {} has not run yet\n", task.status, task.title),
    })
}

/// Reactivate a finished task so the next scheduler tick runs it.
pub async fn retry(ctx: &Context, id: Uuid) -> anyhow::Result<Task> {
    let mut task = ctx
        .store
        .get_task(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No task with id {id}"))?;
    if !task.status.can_transition_to(&TaskStatus::Active) {
        anyhow::bail!("Task {id} is {} and cannot be retried", task.status);
    }
    let now = ctx.clock.now();
    task.status = TaskStatus::Active;
    task.run_at = now;
    task.updated_at = now;
    ctx.store.upsert_task(&task).await?;
    Ok(task)
}

pub async fn delete(ctx: &Context, id: Uuid) -> anyhow::Result<()> {
    if !ctx.store.delete_task(id).await? {
        anyhow::bail!("No task with id {id}");
    }
    Ok(())
}
