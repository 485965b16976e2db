#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rk_core::types::Target;
use rk_session::transport::{Connector, ExecOutput, FileTransfer, RemoteReader, RemoteSession};
use rk_session::{SessionError, TransportError};

/// How the next dialed session behaves.
#[derive(Clone)]
pub struct SessionPlan {
    pub stale_exec: bool,
    pub output: ExecOutput,
    pub exec_delay: Option<Duration>,
    pub sftp_ok: bool,
    pub files: HashMap<String, Vec<u8>>,
}

impl Default for SessionPlan {
    fn default() -> Self {
        Self {
            stale_exec: false,
            output: ExecOutput {
                stdout: "ok\n".into(),
                stderr: String::new(),
                exit_status: Some(0),
            },
            exec_delay: None,
            sftp_ok: true,
            files: HashMap::new(),
        }
    }
}

pub struct FakeSession {
    pub plan: SessionPlan,
    pub alive: AtomicBool,
    pub closed: AtomicBool,
    pub execs: AtomicUsize,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn probe(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn exec(&self, _command: &str) -> Result<ExecOutput, SessionError> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.plan.exec_delay {
            tokio::time::sleep(delay).await;
        }
        if self.plan.stale_exec {
            return Err(SessionError::StaleSession {
                target: "fake".into(),
                reason: "channel open refused".into(),
            });
        }
        Ok(self.plan.output.clone())
    }

    async fn open_file_transfer(&self) -> std::io::Result<Box<dyn FileTransfer>> {
        if !self.plan.sftp_ok {
            return Err(std::io::Error::other("subsystem request failed"));
        }
        Ok(Box::new(FakeFiles {
            files: self.plan.files.clone(),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct FakeFiles {
    files: HashMap<String, Vec<u8>>,
}

#[async_trait]
impl FileTransfer for FakeFiles {
    async fn open(&self, path: &str) -> std::io::Result<RemoteReader> {
        match self.files.get(path) {
            Some(bytes) => Ok(Box::pin(Cursor::new(bytes.clone()))),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no such file",
            )),
        }
    }
}

/// Connector that hands out scripted sessions and records every dial.
#[derive(Default)]
pub struct FakeConnector {
    pub dials: AtomicUsize,
    pub refuse: AtomicBool,
    pub dial_delay: Option<Duration>,
    /// Only dials to this host are delayed, when set.
    pub slow_host: Option<String>,
    plans: Mutex<VecDeque<SessionPlan>>,
    pub default_plan: SessionPlan,
    pub sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default(plan: SessionPlan) -> Self {
        Self {
            default_plan: plan,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            dial_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Delay dials to `host` only.
    pub fn slow_for(host: &str, delay: Duration) -> Self {
        Self {
            dial_delay: Some(delay),
            slow_host: Some(host.to_string()),
            ..Self::default()
        }
    }

    /// Queue plans for the next dials, in order.
    pub fn push_plan(&self, plan: SessionPlan) {
        self.plans.lock().unwrap().push_back(plan);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn session(&self, idx: usize) -> Arc<FakeSession> {
        self.sessions.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, target: &Target) -> Result<Arc<dyn RemoteSession>, TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let delayed = self
            .slow_host
            .as_deref()
            .is_none_or(|host| host == target.host);
        if let (Some(delay), true) = (self.dial_delay, delayed) {
            tokio::time::sleep(delay).await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect {
                addr: target.address(),
                reason: "connection refused".into(),
            });
        }
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_plan.clone());
        let session = Arc::new(FakeSession {
            plan,
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            execs: AtomicUsize::new(0),
        });
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }
}

pub fn target() -> Target {
    Target::with_password("10.0.0.1", "admin", "secret")
}
