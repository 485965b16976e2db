//! russh-backed implementation of the transport traits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rk_core::config::TransportConfig;
use rk_core::types::{Credential, Target};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{SessionError, TransportError};
use crate::host_keys::HostKeyVerifier;
use crate::transport::{Connector, ExecOutput, FileTransfer, RemoteReader, RemoteSession};

/// Extended-data stream number carrying stderr.
const STDERR_STREAM: u32 = 1;

fn io_other(e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(e.to_string())
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Per-connection russh handler; only host-key checking is customised.
pub struct ClientHandler {
    addr: String,
    verifier: Arc<HostKeyVerifier>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = format!("SHA256:{}", server_public_key.fingerprint());
        Ok(self.verifier.verify(&self.addr, &fingerprint))
    }
}

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// Dials real devices over SSH.
pub struct SshConnector {
    config: Arc<client::Config>,
    key_path: PathBuf,
    connect_timeout: Duration,
    verifier: Arc<HostKeyVerifier>,
}

impl SshConnector {
    pub fn new(
        key_path: impl Into<PathBuf>,
        connect_timeout: Duration,
        verifier: Arc<HostKeyVerifier>,
    ) -> Self {
        Self {
            config: Arc::new(client::Config::default()),
            key_path: key_path.into(),
            connect_timeout,
            verifier,
        }
    }

    pub fn from_config(transport: &TransportConfig, verifier: Arc<HostKeyVerifier>) -> Self {
        Self::new(
            transport.expanded_key_path(),
            Duration::from_secs(transport.connect_timeout_secs),
            verifier,
        )
    }

    fn load_key(&self) -> Result<russh_keys::key::KeyPair, TransportError> {
        russh_keys::load_secret_key(&self.key_path, None).map_err(|e| TransportError::KeyLoad {
            path: self.key_path.clone(),
            reason: e.to_string(),
        })
    }

    async fn dial(&self, target: &Target, addr: &str) -> Result<SshSession, TransportError> {
        let handler = ClientHandler {
            addr: addr.to_string(),
            verifier: self.verifier.clone(),
        };

        let mut handle = client::connect(
            self.config.clone(),
            (target.host.as_str(), target.effective_port()),
            handler,
        )
        .await
        .map_err(|e| match e {
            russh::Error::UnknownKey => TransportError::HostKeyRejected {
                addr: addr.to_string(),
            },
            other => TransportError::Connect {
                addr: addr.to_string(),
                reason: other.to_string(),
            },
        })?;

        let auth = match &target.credential {
            Credential::Password { password } => {
                handle
                    .authenticate_password(target.username.as_str(), password.as_str())
                    .await
            }
            Credential::Key => {
                let key = self.load_key()?;
                handle
                    .authenticate_publickey(target.username.as_str(), Arc::new(key))
                    .await
            }
        };

        let accepted = auth.map_err(|e| TransportError::Connect {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        if !accepted {
            return Err(TransportError::AuthRejected {
                user: target.username.clone(),
                addr: addr.to_string(),
            });
        }

        Ok(SshSession {
            addr: addr.to_string(),
            handle: Mutex::new(handle),
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn RemoteSession>, TransportError> {
        let addr = target.address();
        debug!(addr = %addr, user = %target.username, auth = target.auth_mode().as_str(), "dialing");

        let session = tokio::time::timeout(self.connect_timeout, self.dial(target, &addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.clone(),
                after: self.connect_timeout,
            })??;

        info!(addr = %addr, user = %target.username, "ssh session established");
        Ok(Arc::new(session))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct SshSession {
    addr: String,
    handle: Mutex<Handle<ClientHandler>>,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn probe(&self) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.is_closed() {
            return false;
        }
        match handle.send_keepalive(true).await {
            Ok(()) => true,
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "keepalive check failed");
                false
            }
        }
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        let mut channel = {
            let mut handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(|e| SessionError::StaleSession {
                    target: self.addr.clone(),
                    reason: e.to_string(),
                })?
        };

        channel
            .exec(true, command)
            .await
            .map_err(|e| SessionError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                    stderr.extend_from_slice(data)
                }
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    async fn open_file_transfer(&self) -> std::io::Result<Box<dyn FileTransfer>> {
        let channel = {
            let mut handle = self.handle.lock().await;
            handle.channel_open_session().await.map_err(io_other)?
        };
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(io_other)?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(io_other)?;
        Ok(Box::new(SftpTransfer { sftp }))
    }

    async fn close(&self) {
        let mut handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!(addr = %self.addr, error = %e, "disconnect failed");
        }
    }
}

struct SftpTransfer {
    sftp: SftpSession,
}

#[async_trait]
impl FileTransfer for SftpTransfer {
    async fn open(&self, path: &str) -> std::io::Result<RemoteReader> {
        let file = self.sftp.open(path).await.map_err(io_other)?;
        Ok(Box::pin(file))
    }
}
