use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Failure to obtain an authenticated session. Never retried by the core.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    #[error("connect to {addr} timed out after {after:?}")]
    ConnectTimeout { addr: String, after: Duration },

    #[error("cannot load private key {path}: {reason}")]
    KeyLoad { path: PathBuf, reason: String },

    #[error("authentication rejected for {user}@{addr}")]
    AuthRejected { user: String, addr: String },

    #[error("host key for {addr} rejected")]
    HostKeyRejected { addr: String },
}

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

/// Stage of a file download at which it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// Opening the SFTP subsystem on the session.
    Subsystem,
    /// Opening the remote file.
    RemoteOpen,
    /// Creating the local parent directories.
    LocalDir,
    /// Creating the local destination file.
    LocalCreate,
    /// Streaming bytes.
    Copy,
}

impl TransferStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Subsystem => "sftp subsystem",
            TransferStage::RemoteOpen => "remote open",
            TransferStage::LocalDir => "local directory",
            TransferStage::LocalCreate => "local create",
            TransferStage::Copy => "copy",
        }
    }
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A pooled session could not open a channel.
    #[error("stale session for {target}: {reason}")]
    StaleSession { target: String, reason: String },

    #[error("remote command exited with status {exit_status}")]
    RemoteExec {
        exit_status: u32,
        stdout: String,
        stderr: String,
    },

    #[error("remote command timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("transfer failed at {stage} for {path}: {source}")]
    Transfer {
        stage: TransferStage,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("channel error: {0}")]
    Channel(String),
}

impl SessionError {
    pub fn transfer(stage: TransferStage, path: impl Into<String>, source: std::io::Error) -> Self {
        SessionError::Transfer {
            stage,
            path: path.into(),
            source,
        }
    }

    /// Stdout captured before a non-zero exit, if any.
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            SessionError::RemoteExec { stdout, .. } => Some(stdout.as_str()),
            _ => None,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            SessionError::Transport(_) => "transport",
            SessionError::StaleSession { .. } => "stale_session",
            SessionError::RemoteExec { .. } => "remote_exec",
            SessionError::Timeout { .. } => "timeout",
            SessionError::Transfer { .. } => "transfer",
            SessionError::Channel(_) => "channel",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
