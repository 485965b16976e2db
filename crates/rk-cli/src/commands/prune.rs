use rk_core::clock::Clock;
use rk_daemon::retention::{self, RetentionTier};

use super::{format_time, Context};

/// Preview (or with `apply`, perform) a retention pass.
pub async fn run(ctx: &Context, apply: bool) -> anyhow::Result<String> {
    let now = ctx.clock.now();
    if apply {
        let dir = ctx
            .config
            .backup
            .download
            .then(|| ctx.config.backup.expanded_backup_dir());
        let report = retention::apply(ctx.store.as_ref(), dir.as_deref(), now).await?;
        let mut out = format!(
            "Examined {} backup(s), deleted {}.\n",
            report.examined, report.deleted
        );
        for err in &report.errors {
            out.push_str(&format!("  error: {err}\n"));
        }
        return Ok(out);
    }

    let backups = ctx.store.list_backups().await?;
    let doomed = retention::plan(&backups, now);
    if doomed.is_empty() {
        return Ok(format!("Nothing to prune ({} backup(s) kept).\n", backups.len()));
    }
    let mut out = format!(
        "Would delete {} of {} backup(s):\n",
        doomed.len(),
        backups.len()
    );
    for b in doomed {
        out.push_str(&format!(
            "  {}  {:<20} {}  [{}]\n",
            format_time(b.created_at),
            b.device_name,
            b.filename,
            RetentionTier::for_age(b.age(now)).as_str()
        ));
    }
    out.push_str("Re-run with --apply to delete.\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use chrono::Duration;
    use rk_core::types::Backup;

    async fn seed(ctx: &Context) {
        let device = ctx.device("r1").await.unwrap();
        // 12:00 minus 400 days and 5 hours lands on 07:00.
        let stale = testing::now() - Duration::days(400) - Duration::hours(5);
        ctx.store
            .insert_backup(&Backup::new(&device, "stale.backup", stale))
            .await
            .unwrap();
        ctx.store
            .insert_backup(&Backup::new(&device, "fresh.backup", testing::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn preview_does_not_delete() {
        let (ctx, _) = testing::context().await;
        seed(&ctx).await;

        let out = run(&ctx, false).await.unwrap();
        assert!(out.starts_with("Would delete 1 of 2"));
        assert!(out.contains("stale.backup"));
        assert!(out.contains("[daily]"));
        assert_eq!(ctx.store.list_backups().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn apply_deletes() {
        let (ctx, _) = testing::context().await;
        seed(&ctx).await;

        let out = run(&ctx, true).await.unwrap();
        assert_eq!(out, "Examined 2 backup(s), deleted 1.\n");
        let left = ctx.store.list_backups().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].filename, "fresh.backup");
    }
}
