use rk_core::types::{is_safe_path_component, Device, DeviceKind, Target};

use super::Context;

pub fn parse_kind(raw: &str) -> anyhow::Result<DeviceKind> {
    match raw.to_ascii_lowercase().as_str() {
        "mikrotik" => Ok(DeviceKind::Mikrotik),
        "olt" => Ok(DeviceKind::Olt),
        "switch" => Ok(DeviceKind::Switch),
        "other" => Ok(DeviceKind::Other),
        other => anyhow::bail!("unknown device kind {other:?} (mikrotik, olt, switch, other)"),
    }
}

pub struct NewDevice {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `None` selects key-based auth.
    pub password: Option<String>,
}

pub async fn add(ctx: &Context, new: NewDevice) -> anyhow::Result<Device> {
    // Ids name the device's backup directory.
    if !is_safe_path_component(&new.id) {
        anyhow::bail!("invalid device id {:?}: must not be empty, `.`, `..` or contain `/` or `\\`", new.id);
    }
    let target = match new.password {
        Some(password) => Target::with_password(new.host, new.username, password),
        None => Target::with_key(new.host, new.username),
    }
    .on_port(new.port);
    let device = Device::new(new.id, new.name, new.kind, target);
    ctx.store.upsert_device(&device).await?;
    Ok(device)
}

pub async fn list(ctx: &Context) -> anyhow::Result<String> {
    let devices = ctx.store.list_devices().await?;
    if devices.is_empty() {
        return Ok("No devices.\n".to_string());
    }
    let mut out = format!("{:<12} {:<20} {:<9} {:<28} {}\n", "ID", "NAME", "KIND", "ADDRESS", "AUTH");
    for d in devices {
        out.push_str(&format!(
            "{:<12} {:<20} {:<9} {:<28} {}\n",
            d.id,
            d.name,
            d.kind.as_str(),
            format!("{}@{}", d.target.username, d.target.address()),
            d.target.auth_mode().as_str(),
        ));
    }
    Ok(out)
}

/// Remove a device. Its tasks stay and fail until it is added again.
pub async fn delete(ctx: &Context, id: &str) -> anyhow::Result<String> {
    if !ctx.store.delete_device(id).await? {
        anyhow::bail!("No device with id {id:?}");
    }
    let tasks = ctx
        .store
        .list_tasks()
        .await?
        .into_iter()
        .filter(|t| t.device_id == id)
        .count();
    let mut out = format!("Device {id} deleted.\n");
    if tasks > 0 {
        out.push_str(&format!(
            "{tasks} task(s) still reference it; remove them with `rk tasks delete`.\n"
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;
    use rk_core::types::AuthMode;

    #[tokio::test]
    async fn add_with_key_auth_and_custom_port() {
        let (ctx, _) = testing::context().await;
        let device = add(
            &ctx,
            NewDevice {
                id: "sw1".into(),
                name: "core-switch".into(),
                kind: DeviceKind::Switch,
                host: "10.0.0.2".into(),
                port: 2222,
                username: "ops".into(),
                password: None,
            },
        )
        .await
        .unwrap();

        assert_eq!(device.target.auth_mode(), AuthMode::Key);
        let stored = ctx.device("sw1").await.unwrap();
        assert_eq!(stored.target.address(), "10.0.0.2:2222");
    }

    #[tokio::test]
    async fn list_shows_every_device() {
        let (ctx, _) = testing::context().await;
        let out = list(&ctx).await.unwrap();
        assert!(out.starts_with("ID"));
        assert!(out.contains("edge-router"));
        assert!(out.contains("admin@10.0.0.1:22"));
        assert!(out.contains("pass"));
    }

    #[test]
    fn kinds_are_case_insensitive() {
        assert_eq!(parse_kind("OLT").unwrap(), DeviceKind::Olt);
        assert!(parse_kind("firewall").is_err());
    }

    fn named(id: &str) -> NewDevice {
        NewDevice {
            id: id.into(),
            name: "x".into(),
            kind: DeviceKind::Mikrotik,
            host: "10.0.0.5".into(),
            port: 22,
            username: "admin".into(),
            password: Some("pw".into()),
        }
    }

    #[tokio::test]
    async fn add_rejects_ids_that_are_not_plain_names() {
        let (ctx, _) = testing::context().await;
        for id in ["", "..", "../r1", "a/b"] {
            assert!(add(&ctx, named(id)).await.is_err(), "{id:?}");
        }
        assert_eq!(ctx.store.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_warns_about_remaining_tasks() {
        let (ctx, _) = testing::context().await;
        ctx.store
            .upsert_task(&rk_core::types::Task::single("t", "/ping", "r1", testing::now()))
            .await
            .unwrap();

        let out = delete(&ctx, "r1").await.unwrap();
        assert!(out.contains("1 task(s) still reference it"), "{out}");
        assert!(ctx.store.lookup_device("r1").await.unwrap().is_none());
        assert!(delete(&ctx, "r1").await.is_err());
    }
}
