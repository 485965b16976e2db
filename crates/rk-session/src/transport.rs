use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use rk_core::types::Target;
use tokio::io::AsyncRead;

use crate::error::{SessionError, TransportError};

/// Byte stream of a remote file opened for reading.
pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the channel closed without reporting a status.
    pub exit_status: Option<u32>,
}

impl ExecOutput {
    /// Stdout on success; a missing exit status counts as success.
    pub fn into_result(self) -> Result<String, SessionError> {
        match self.exit_status {
            None | Some(0) => Ok(self.stdout),
            Some(code) => Err(SessionError::RemoteExec {
                exit_status: code,
                stdout: self.stdout,
                stderr: self.stderr,
            }),
        }
    }
}

/// Dials and authenticates sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn RemoteSession>, TransportError>;
}

/// A live, authenticated connection to one target.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Liveness check on a cached session.
    async fn probe(&self) -> bool;

    /// Run one command on a fresh exec channel.
    ///
    /// A failure to open the channel is reported as
    /// [`SessionError::StaleSession`] so the caller can redial.
    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError>;

    /// Open a file-transfer sub-session over this connection.
    async fn open_file_transfer(&self) -> std::io::Result<Box<dyn FileTransfer>>;

    /// Disconnect. Errors are swallowed; the session is gone either way.
    async fn close(&self);
}

/// Read side of a file-transfer sub-session.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    async fn open(&self, path: &str) -> std::io::Result<RemoteReader>;
}
