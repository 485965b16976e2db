use std::path::Path;

use super::Context;

/// Copy a remote file from a device to `local`. Returns bytes copied.
pub async fn run(ctx: &Context, device_id: &str, remote: &str, local: &Path) -> anyhow::Result<u64> {
    let device = ctx.device(device_id).await?;
    let bytes = ctx
        .retriever
        .download(&device.target, remote, local)
        .await
        .map_err(|e| anyhow::anyhow!("download from {} failed: {e}", device.name))?;
    Ok(bytes)
}
