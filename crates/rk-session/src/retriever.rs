use std::path::Path;
use std::sync::Arc;

use rk_core::types::Target;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{SessionError, TransferStage};
use crate::pool::SessionPool;

/// Copies remote files to local storage over an SFTP sub-session.
pub struct FileRetriever {
    pool: Arc<SessionPool>,
}

impl FileRetriever {
    pub fn new(pool: Arc<SessionPool>) -> Self {
        Self { pool }
    }

    /// Download `remote_path` from `target` into `local_path`, creating
    /// missing parent directories. Returns the number of bytes copied.
    ///
    /// No stale-session retry: dial and auth failures surface directly.
    pub async fn download(
        &self,
        target: &Target,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<u64, SessionError> {
        let lease = self.pool.acquire(target).await?;

        let transfer = lease
            .session()
            .open_file_transfer()
            .await
            .map_err(|e| SessionError::transfer(TransferStage::Subsystem, remote_path, e))?;

        let mut remote = transfer
            .open(remote_path)
            .await
            .map_err(|e| SessionError::transfer(TransferStage::RemoteOpen, remote_path, e))?;

        let local_display = local_path.display().to_string();
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SessionError::transfer(TransferStage::LocalDir, parent.display().to_string(), e)
            })?;
        }

        let mut local = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| SessionError::transfer(TransferStage::LocalCreate, &local_display, e))?;

        let copied = tokio::io::copy(&mut remote, &mut local)
            .await
            .map_err(|e| SessionError::transfer(TransferStage::Copy, &local_display, e))?;
        local
            .flush()
            .await
            .map_err(|e| SessionError::transfer(TransferStage::Copy, &local_display, e))?;

        info!(
            peer = %lease.key(),
            remote = remote_path,
            local = %local_display,
            bytes = copied,
            "file downloaded"
        );
        Ok(copied)
    }
}
