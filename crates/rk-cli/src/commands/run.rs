use super::Context;

/// Run a single command on a device and return its stdout.
pub async fn run(ctx: &Context, device_id: &str, command: &str) -> anyhow::Result<String> {
    let device = ctx.device(device_id).await?;
    match ctx.executor.run(&device.target, command).await {
        Ok(stdout) => Ok(stdout),
        Err(e) => {
            let partial = e.partial_output().unwrap_or_default();
            if partial.is_empty() {
                anyhow::bail!("{} failed: {e}", device.name)
            }
            anyhow::bail!("{} failed: {e}\npartial output:\n{partial}", device.name)
        }
    }
}
