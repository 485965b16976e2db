use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Port used when a device record leaves the SSH port unset (0).
pub const DEFAULT_SSH_PORT: u16 = 22;

// ---------------------------------------------------------------------------
// Credentials & targets
// ---------------------------------------------------------------------------

/// How a session authenticates. Part of the pool identity key, so the same
/// user on the same host holds separate sessions for password and key auth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Password,
    Key,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::Password => "pass",
            AuthMode::Key => "key",
        }
    }
}

/// Secret material for a target. Key-based auth reads the private key from
/// the local key store configured under `[transport] key_path`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "auth", rename_all = "snake_case")]
pub enum Credential {
    Password { password: String },
    Key,
}

impl Credential {
    pub fn auth_mode(&self) -> AuthMode {
        match self {
            Credential::Password { .. } => AuthMode::Password,
            Credential::Key => AuthMode::Key,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f.write_str("Password(<redacted>)"),
            Credential::Key => f.write_str("Key"),
        }
    }
}

/// Connection parameters for one remote device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl Target {
    pub fn with_password(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential: Credential::Password {
                password: password.into(),
            },
        }
    }

    pub fn with_key(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential: Credential::Key,
        }
    }

    /// Builder-style port override.
    pub fn on_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Port to dial; a zero port falls back to 22.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.credential.auth_mode()
    }

    /// `host:port` string used for dialing and host-key bookkeeping.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.effective_port())
    }

    /// Identity key under which the pool stores this target's session.
    pub fn key(&self) -> TargetKey {
        TargetKey {
            user: self.username.clone(),
            host: self.host.clone(),
            port: self.effective_port(),
            auth: self.auth_mode(),
        }
    }
}

/// Pool identity: (user, host, port, auth-mode).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetKey {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub auth: AuthMode,
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}[{}]",
            self.user,
            self.host,
            self.port,
            self.auth.as_str()
        )
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Mikrotik,
    Olt,
    Switch,
    Other,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Mikrotik => "mikrotik",
            DeviceKind::Olt => "olt",
            DeviceKind::Switch => "switch",
            DeviceKind::Other => "other",
        }
    }
}

/// A managed piece of network equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub kind: DeviceKind,
    pub target: Target,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        kind: DeviceKind,
        target: Target,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            target,
        }
    }
}

/// True when `s` can name exactly one directory entry: non-empty, not `.`
/// or `..`, and free of path separators and NUL.
pub fn is_safe_path_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', '\0'])
}

/// `<dir>/<device_id>/<filename>` when both are safe path components.
pub fn local_backup_path(dir: &Path, device_id: &str, filename: &str) -> Option<PathBuf> {
    (is_safe_path_component(device_id) && is_safe_path_component(filename))
        .then(|| dir.join(device_id).join(filename))
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Active)
                | (TaskStatus::Active, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Error)
                | (TaskStatus::Completed, TaskStatus::Active)
                | (TaskStatus::Error, TaskStatus::Active)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Single,
    Recurring,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub command: String,
    pub device_id: String,
    pub run_at: DateTime<Utc>,
    pub kind: TaskKind,
    /// Recurrence interval such as `"24h"`, `"90m"` or `"6"` (hours).
    pub interval: Option<String>,
    pub until: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Output (or error text) of the most recent run.
    pub result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A one-shot task, active immediately.
    pub fn single(
        title: impl Into<String>,
        command: impl Into<String>,
        device_id: impl Into<String>,
        run_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            command: command.into(),
            device_id: device_id.into(),
            run_at,
            kind: TaskKind::Single,
            interval: None,
            until: None,
            status: TaskStatus::Active,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn recurring(
        title: impl Into<String>,
        command: impl Into<String>,
        device_id: impl Into<String>,
        run_at: DateTime<Utc>,
        interval: impl Into<String>,
    ) -> Self {
        let mut task = Self::single(title, command, device_id, run_at);
        task.kind = TaskKind::Recurring;
        task.interval = Some(interval.into());
        task
    }

    pub fn with_until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// Active and scheduled at or before `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Active && self.run_at <= now
    }

    /// Recurring with a non-empty interval string.
    pub fn is_recurring(&self) -> bool {
        self.kind == TaskKind::Recurring
            && self
                .interval
                .as_deref()
                .is_some_and(|i| !i.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Backup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub filename: String,
    /// Size of the pulled file; `None` until the file has been downloaded.
    pub size_bytes: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_test: bool,
}

impl Backup {
    pub fn new(device: &Device, filename: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            filename: filename.into(),
            size_bytes: None,
            created_at,
            is_test: false,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// `<dir>/<device_id>/<filename>`, or `None` when either component
    /// would leave `dir`.
    pub fn local_path(&self, dir: &Path) -> Option<PathBuf> {
        local_backup_path(dir, &self.device_id, &self.filename)
    }
}
