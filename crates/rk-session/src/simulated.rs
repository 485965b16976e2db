//! In-process stand-in for real devices.
//!
//! Every target "connects" instantly. Commands are echoed back, and a
//! backup-save command (`... name=<stem>`) produces a `<stem>.backup` file
//! that can later be downloaded through the file-transfer path. Used by the
//! daemon's simulated transport mode and by the CLI for dry runs.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rk_core::types::Target;
use tracing::debug;

use crate::error::{SessionError, TransportError};
use crate::transport::{Connector, ExecOutput, FileTransfer, RemoteReader, RemoteSession};

/// Remote files keyed by `host:port` then path.
type FileTable = Arc<DashMap<(String, String), Vec<u8>>>;

#[derive(Default)]
pub struct SimulatedConnector {
    files: FileTable,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a file on a simulated device.
    pub fn put_file(&self, target: &Target, path: &str, contents: impl Into<Vec<u8>>) {
        self.files
            .insert(
                (target.address(), path.trim_start_matches('/').to_string()),
                contents.into(),
            );
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn RemoteSession>, TransportError> {
        debug!(addr = %target.address(), "simulated dial");
        Ok(Arc::new(SimulatedSession {
            addr: target.address(),
            files: self.files.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct SimulatedSession {
    addr: String,
    files: FileTable,
    closed: AtomicBool,
}

fn backup_stem(command: &str) -> Option<&str> {
    command
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("name="))
        .filter(|stem| !stem.is_empty())
}

#[async_trait]
impl RemoteSession for SimulatedSession {
    async fn probe(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::StaleSession {
                target: self.addr.clone(),
                reason: "session closed".to_string(),
            });
        }

        let stdout = match backup_stem(command) {
            Some(stem) if command.contains("backup") => {
                let path = format!("{stem}.backup");
                let body = format!("# simulated backup of {} as {path}\n", self.addr);
                self.files
                    .insert((self.addr.clone(), path), body.into_bytes());
                "Configuration backup saved\n".to_string()
            }
            _ => format!("[{}] {}\n", self.addr, command),
        };

        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
            exit_status: Some(0),
        })
    }

    async fn open_file_transfer(&self) -> std::io::Result<Box<dyn FileTransfer>> {
        Ok(Box::new(SimulatedFiles {
            addr: self.addr.clone(),
            files: self.files.clone(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct SimulatedFiles {
    addr: String,
    files: FileTable,
}

#[async_trait]
impl FileTransfer for SimulatedFiles {
    async fn open(&self, path: &str) -> std::io::Result<RemoteReader> {
        let path = path.trim_start_matches('/');
        let contents = self
            .files
            .get(&(self.addr.clone(), path.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such file: {path}"))
            })?;
        Ok(Box::pin(Cursor::new(contents)))
    }
}
