#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rk_core::clock::ManualClock;
use rk_core::memory::MemoryStore;
use rk_core::store::Store;
use rk_core::types::{Device, DeviceKind, Target};
use rk_session::transport::{Connector, ExecOutput, FileTransfer, RemoteSession};
use rk_session::{CommandExecutor, FileRetriever, SessionError, SessionPool, TransportError};

/// Records every command it is asked to run. Hosts listed in `failing`
/// answer with exit status 1; hosts in `refused` cannot be dialed.
#[derive(Default)]
pub struct ScriptedConnector {
    pub commands: Arc<Mutex<Vec<(String, String)>>>,
    pub failing: Mutex<HashSet<String>>,
    pub refused: Mutex<HashSet<String>>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_host(&self, host: &str) {
        self.failing.lock().unwrap().insert(host.to_string());
    }

    pub fn refuse_host(&self, host: &str) {
        self.refused.lock().unwrap().insert(host.to_string());
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn RemoteSession>, TransportError> {
        if self.refused.lock().unwrap().contains(&target.host) {
            return Err(TransportError::Connect {
                addr: target.address(),
                reason: "connection refused".into(),
            });
        }
        Ok(Arc::new(ScriptedSession {
            host: target.host.clone(),
            fail: self.failing.lock().unwrap().contains(&target.host),
            commands: self.commands.clone(),
        }))
    }
}

struct ScriptedSession {
    host: String,
    fail: bool,
    commands: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn probe(&self) -> bool {
        true
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        self.commands
            .lock()
            .unwrap()
            .push((self.host.clone(), command.to_string()));
        Ok(if self.fail {
            ExecOutput {
                stdout: "partial".into(),
                stderr: "failure: bad command".into(),
                exit_status: Some(1),
            }
        } else {
            ExecOutput {
                stdout: format!("ran {command}\n"),
                stderr: String::new(),
                exit_status: Some(0),
            }
        })
    }

    async fn open_file_transfer(&self) -> std::io::Result<Box<dyn FileTransfer>> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "sftp subsystem unavailable",
        ))
    }

    async fn close(&self) {}
}

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 12, 0, 0).unwrap()
}

pub fn device(id: &str, host: &str) -> Device {
    Device::new(
        id,
        format!("router-{id}"),
        DeviceKind::Mikrotik,
        Target::with_password(host, "admin", "secret"),
    )
}

pub struct Harness {
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
    pub executor: Arc<CommandExecutor>,
    pub retriever: Arc<FileRetriever>,
}

impl Harness {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let pool = Arc::new(SessionPool::new(connector));
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: Arc::new(ManualClock::new(start())),
            executor: Arc::new(CommandExecutor::new(pool.clone(), Duration::from_secs(5))),
            retriever: Arc::new(FileRetriever::new(pool)),
        }
    }
}
