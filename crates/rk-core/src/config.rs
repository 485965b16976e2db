use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{is_safe_path_component, DeviceKind};

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV: &str = "ROUTERKEEP_CONFIG";

/// Top-level configuration loaded from `~/.routerkeep/config.toml`.
///
/// Device credentials never live here; they are resolved from the store by
/// device identifier at the moment an operation needs them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Config {
    /// Load config from `$ROUTERKEEP_CONFIG` or `~/.routerkeep/config.toml`,
    /// falling back to defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path)
            .map_err(|e| ConfigError::Io(format!("{}: {e}", path.display())))?;
        Self::from_toml(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        self.validate()?;
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Semantic validation for settings that are not fully expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.transport.validate()?;
        self.executor.validate()?;
        self.scheduler.validate()?;
        self.backup.validate()?;
        self.security.validate()?;
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        if let Some(explicit) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(explicit);
        }
        home_dir().join(".routerkeep").join("config.toml")
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None if raw == "~" => home_dir(),
        None => PathBuf::from(raw),
    }
}

fn require_nonzero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// Database path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        expand_home(&self.path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backend == StoreBackend::Sqlite && self.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "store.path must not be empty for the sqlite backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_store_path() -> String {
    "~/.routerkeep/routerkeep.db".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Real SSH connections.
    #[default]
    Ssh,
    /// In-process fake devices; nothing leaves the machine.
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
    /// Private key used for key-based authentication.
    #[serde(default = "default_key_path")]
    pub key_path: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How often the daemon probes pooled sessions and evicts dead ones.
    #[serde(default = "default_pool_sweep_secs")]
    pub pool_sweep_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            key_path: default_key_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_sweep_secs: default_pool_sweep_secs(),
        }
    }
}

impl TransportConfig {
    pub fn expanded_key_path(&self) -> PathBuf {
        expand_home(&self.key_path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("transport.connect_timeout_secs", self.connect_timeout_secs)?;
        require_nonzero("transport.pool_sweep_secs", self.pool_sweep_secs)
    }
}

fn default_key_path() -> String {
    "data/id_rsa".into()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_pool_sweep_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("executor.command_timeout_secs", self.command_timeout_secs)
    }
}

fn default_command_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_scheduler_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Recurrence intervals below this are raised to it.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_scheduler_tick_secs(),
            max_concurrent: default_max_concurrent(),
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("scheduler.tick_secs", self.tick_secs)?;
        require_nonzero("scheduler.max_concurrent", self.max_concurrent as u64)?;
        require_nonzero("scheduler.min_interval_secs", self.min_interval_secs)
    }
}

fn default_true() -> bool {
    true
}
fn default_scheduler_tick_secs() -> u64 {
    30
}
fn default_max_concurrent() -> usize {
    16
}
fn default_min_interval_secs() -> u64 {
    60
}

/// Command template key used when a device kind has no entry of its own.
pub const DEFAULT_BACKUP_COMMAND_KEY: &str = "default";

/// Upper bound for `backup.threshold_mins` (one year).
pub const MAX_THRESHOLD_MINS: u64 = 366 * 24 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backup_tick_secs")]
    pub tick_secs: u64,
    /// A device is backed up again once its latest backup is older than this.
    #[serde(default = "default_threshold_mins")]
    pub threshold_mins: u64,
    /// Pull the produced file to `backup_dir` after the save command.
    #[serde(default)]
    pub download: bool,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: String,
    #[serde(default = "default_filename_prefix")]
    pub filename_prefix: String,
    /// Save-command templates keyed by device kind; `{name}` is replaced by
    /// the file stem.
    #[serde(default = "default_backup_commands")]
    pub commands: BTreeMap<String, String>,
    #[serde(default = "default_backup_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_true")]
    pub retention: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_secs: default_backup_tick_secs(),
            threshold_mins: default_threshold_mins(),
            download: false,
            backup_dir: default_backup_dir(),
            filename_prefix: default_filename_prefix(),
            commands: default_backup_commands(),
            max_concurrent: default_backup_max_concurrent(),
            retention: true,
        }
    }
}

impl BackupConfig {
    /// Save-command template for a device kind.
    pub fn command_template(&self, kind: &DeviceKind) -> Option<&str> {
        self.commands
            .get(kind.as_str())
            .or_else(|| self.commands.get(DEFAULT_BACKUP_COMMAND_KEY))
            .map(String::as_str)
    }

    pub fn expanded_backup_dir(&self) -> PathBuf {
        expand_home(&self.backup_dir)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        require_nonzero("backup.tick_secs", self.tick_secs)?;
        require_nonzero("backup.threshold_mins", self.threshold_mins)?;
        if self.threshold_mins > MAX_THRESHOLD_MINS {
            return Err(ConfigError::Validation(format!(
                "backup.threshold_mins must be at most {MAX_THRESHOLD_MINS}"
            )));
        }
        require_nonzero("backup.max_concurrent", self.max_concurrent as u64)?;
        if self.filename_prefix.trim().is_empty() {
            return Err(ConfigError::Validation(
                "backup.filename_prefix must not be empty".to_string(),
            ));
        }
        if !is_safe_path_component(&self.filename_prefix) {
            return Err(ConfigError::Validation(
                "backup.filename_prefix must not contain path separators".to_string(),
            ));
        }
        if let Some((kind, _)) = self
            .commands
            .iter()
            .find(|(_, template)| !template.contains("{name}"))
        {
            return Err(ConfigError::Validation(format!(
                "backup.commands.{kind} must contain the {{name}} placeholder"
            )));
        }
        Ok(())
    }
}

fn default_backup_tick_secs() -> u64 {
    300
}
fn default_threshold_mins() -> u64 {
    55
}
fn default_backup_dir() -> String {
    "data/backups".into()
}
fn default_filename_prefix() -> String {
    "routerkeep".into()
}
fn default_backup_commands() -> BTreeMap<String, String> {
    BTreeMap::from([(
        DEFAULT_BACKUP_COMMAND_KEY.to_string(),
        "/system backup save name={name}".to_string(),
    )])
}
fn default_backup_max_concurrent() -> usize {
    8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept whatever key the server presents.
    AcceptAny,
    /// Remember the first fingerprint per `host:port`, reject changes.
    #[default]
    TrustOnFirstUse,
    /// Only fingerprints listed in `known_hosts`.
    Pinned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,
    /// `host:port` → accepted SHA-256 fingerprints.
    #[serde(default)]
    pub known_hosts: BTreeMap<String, Vec<String>>,
}

impl SecurityConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host_key_policy == HostKeyPolicy::Pinned && self.known_hosts.is_empty() {
            return Err(ConfigError::Validation(
                "security.host_key_policy = \"pinned\" requires at least one known_hosts entry"
                    .to_string(),
            ));
        }
        for (addr, prints) in &self.known_hosts {
            if !addr.contains(':') {
                return Err(ConfigError::Validation(format!(
                    "security.known_hosts key {addr:?} must be host:port"
                )));
            }
            if prints.iter().any(|p| p.trim().is_empty()) {
                return Err(ConfigError::Validation(format!(
                    "security.known_hosts.{addr:?} contains an empty fingerprint"
                )));
            }
        }
        Ok(())
    }
}
