//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::logs::LogLevel;
use crate::validate::health::HealthCheck;
use crate::validate::window::MaintenanceWindow;

/// Orchestrator settings, read from `settings.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Control surface
    #[serde(default)]
    pub server: ServerSettings,

    /// Worker pool and parallelism
    #[serde(default)]
    pub engine: EngineSettings,

    /// Remote execution
    #[serde(default)]
    pub remote: RemoteSettings,

    /// Health validation
    #[serde(default)]
    pub health: HealthSettingsFile,

    /// Windows during which deployments may start. Always allowed when empty.
    #[serde(default)]
    pub maintenance_windows: Vec<MaintenanceWindow>,

    /// Audit sinks
    #[serde(default)]
    pub audit: AuditSettings,

    /// Keep deployment records on disk
    #[serde(default = "default_true")]
    pub persist_deployments: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            server: ServerSettings::default(),
            engine: EngineSettings::default(),
            remote: RemoteSettings::default(),
            health: HealthSettingsFile::default(),
            maintenance_windows: Vec::new(),
            audit: AuditSettings::default(),
            persist_deployments: true,
        }
    }
}

impl Settings {
    /// Reject settings that would only fail later
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        for window in &self.maintenance_windows {
            window.validate().map_err(OrchestratorError::ConfigError)?;
        }
        if self.engine.workers == 0 {
            return Err(OrchestratorError::ConfigError("engine.workers must be at least 1".to_string()));
        }
        if self.engine.max_parallel == 0 {
            return Err(OrchestratorError::ConfigError(
                "engine.max_parallel must be at least 1".to_string(),
            ));
        }
        if let Some(url) = &self.audit.webhook_url {
            url::Url::parse(url)
                .map_err(|e| OrchestratorError::ConfigError(format!("Invalid audit.webhook_url: {}", e)))?;
        }
        Ok(())
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Deployments driven concurrently
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs waiting for a worker before submits are refused
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Concurrent per-asset operations within a deployment
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_parallel() -> usize {
    16
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            max_parallel: default_max_parallel(),
        }
    }
}

/// How commands reach assets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,

    /// Run on the orchestrator host itself
    Local,
}

/// Remote execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub identity_file: Option<String>,

    #[serde(default = "default_true")]
    pub strict_host_key_checking: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_command_timeout() -> u64 {
    600
}

fn default_connect_retries() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

fn default_probe_timeout() -> u64 {
    3_000
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
            identity_file: None,
            strict_host_key_checking: true,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            connect_retries: default_connect_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}

/// Health validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettingsFile {
    #[serde(default = "default_checks")]
    pub checks: Vec<HealthCheck>,

    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// Re-run a failed asset's checks once before counting it as failed
    #[serde(default)]
    pub recheck_failed: bool,

    #[serde(default = "default_recheck_delay")]
    pub recheck_delay_ms: u64,
}

fn default_checks() -> Vec<HealthCheck> {
    vec![HealthCheck::ServiceActive { service: None }]
}

fn default_check_timeout() -> u64 {
    30
}

fn default_recheck_delay() -> u64 {
    5_000
}

impl Default for HealthSettingsFile {
    fn default() -> Self {
        Self {
            checks: default_checks(),
            check_timeout_secs: default_check_timeout(),
            recheck_failed: false,
            recheck_delay_ms: default_recheck_delay(),
        }
    }
}

/// Audit sink settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditSettings {
    /// Keep events in memory for `GET /deployments/{id}/events`
    #[serde(default = "default_true")]
    pub journal: bool,

    /// POST every event to this URL
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            journal: true,
            webhook_url: None,
        }
    }
}
