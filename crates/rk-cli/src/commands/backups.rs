use rk_core::types::Backup;
use uuid::Uuid;

use super::{format_time, Context};

fn describe(backup: &Backup) -> String {
    let size = backup
        .size_bytes
        .map(|s| format!("{s} bytes"))
        .unwrap_or_else(|| "not downloaded".to_string());
    format!("{} ({size})", backup.filename)
}

pub async fn list(ctx: &Context, device: Option<&str>) -> anyhow::Result<String> {
    let backups = ctx.store.list_backups().await?;
    let backups: Vec<_> = backups
        .into_iter()
        .filter(|b| device.is_none_or(|id| b.device_id == id))
        .collect();
    if backups.is_empty() {
        return Ok("No backups.\n".to_string());
    }

    let mut out = format!(
        "{:<36} {:<24} {:<20} {:<40} {}\n",
        "ID", "CREATED", "DEVICE", "FILE", "SIZE"
    );
    for b in &backups {
        let size = b
            .size_bytes
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let file = if b.is_test {
            format!("{} [test]", b.filename)
        } else {
            b.filename.clone()
        };
        out.push_str(&format!(
            "{:<36} {:<24} {:<20} {:<40} {}\n",
            b.id,
            format_time(b.created_at),
            b.device_name,
            file,
            size
        ));
    }
    out.push_str(&format!("{} backup(s)\n", backups.len()));
    Ok(out)
}

/// Back a device up right away, whatever the age of its latest backup.
pub async fn now(ctx: &Context, device_id: &str) -> anyhow::Result<String> {
    let device = ctx.device(device_id).await?;
    let backup = ctx.backups().backup_device(&device).await?;
    Ok(format!("Backup of {} saved: {}\n", device.name, describe(&backup)))
}

/// Run the end-to-end test backup for a device.
pub async fn test_backup(ctx: &Context, device_id: &str) -> anyhow::Result<String> {
    let device = ctx.device(device_id).await?;
    let backup = ctx
        .backups()
        .test_backup(&device)
        .await
        .map_err(|e| anyhow::anyhow!("Test backup of {} failed: {e}", device.name))?;
    Ok(format!(
        "SSH and SFTP OK for {}: downloaded {}\n",
        device.name,
        describe(&backup)
    ))
}

pub async fn delete(ctx: &Context, id: Uuid) -> anyhow::Result<String> {
    match ctx.backups().delete_backup(id).await? {
        Some(backup) => Ok(format!("Deleted backup {} of {}.\n", backup.filename, backup.device_name)),
        None => anyhow::bail!("No backup with id {id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use chrono::Duration;
    use rk_core::types::Backup;

    #[tokio::test]
    async fn newest_first_and_filtered() {
        let (ctx, _) = testing::context().await;
        let device = ctx.device("r1").await.unwrap();
        let mut other = device.clone();
        other.id = "r2".into();
        other.name = "branch-router".into();

        let old = Backup::new(&device, "old.backup", testing::now() - Duration::hours(3));
        let mut new = Backup::new(&device, "new.backup", testing::now());
        new.size_bytes = Some(2048);
        ctx.store.insert_backup(&old).await.unwrap();
        ctx.store.insert_backup(&new).await.unwrap();
        ctx.store
            .insert_backup(&Backup::new(&other, "branch.backup", testing::now()))
            .await
            .unwrap();

        let out = list(&ctx, Some("r1")).await.unwrap();
        let new_at = out.find("new.backup").unwrap();
        let old_at = out.find("old.backup").unwrap();
        assert!(new_at < old_at);
        assert!(!out.contains("branch.backup"));
        assert!(out.contains("2048"));
        assert!(out.ends_with("2 backup(s)\n"));
    }

    #[tokio::test]
    async fn now_records_a_backup() {
        let (ctx, _) = testing::context().await;
        let out = now(&ctx, "r1").await.unwrap();
        assert!(out.starts_with("Backup of edge-router saved: routerkeep_auto_20240506_1200.backup"));
        assert_eq!(ctx.store.list_backups().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = rk_core::config::Config::default();
        config.backup.backup_dir = dir.path().display().to_string();
        let (ctx, _) = testing::context_with(config).await;

        let out = test_backup(&ctx, "r1").await.unwrap();
        assert!(out.contains("test_connection.backup"), "{out}");
        let listed = list(&ctx, None).await.unwrap();
        assert!(listed.contains("test_connection.backup [test]"), "{listed}");

        let backup = ctx.store.list_backups().await.unwrap().remove(0);
        assert!(dir.path().join("r1").join("test_connection.backup").exists());
        delete(&ctx, backup.id).await.unwrap();
        assert!(!dir.path().join("r1").join("test_connection.backup").exists());
        assert!(delete(&ctx, backup.id).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let (ctx, _) = testing::context().await;
        assert!(test_backup(&ctx, "ghost").await.is_err());
    }

    #[tokio::test]
    async fn empty_store() {
        let (ctx, _) = testing::context().await;
        assert_eq!(list(&ctx, None).await.unwrap(), "No backups.\n");
    }
}
