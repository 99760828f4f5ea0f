//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::engine::EngineOptions;
use crate::remote::executor::ExecutorOptions;
use crate::remote::ssh::SshOptions;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{AuditSettings, Settings, TransportKind};
use crate::utils::CooldownOptions;
use crate::validate::health::HealthSettings;
use crate::validate::window::MaintenanceWindow;
use crate::workers::dispatcher;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable the HTTP control surface
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Worker pool options
    pub workers: dispatcher::Options,

    /// Engine options
    pub engine: EngineOptions,

    /// How commands reach assets
    pub remote: RemoteOptions,

    /// Health validation
    pub health: HealthSettings,

    /// Windows during which deployments may start
    pub maintenance_windows: Vec<MaintenanceWindow>,

    /// Audit sinks
    pub audit: AuditSettings,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            workers: dispatcher::Options::default(),
            engine: EngineOptions::default(),
            remote: RemoteOptions::default(),
            health: HealthSettings::default(),
            maintenance_windows: Vec::new(),
            audit: AuditSettings::default(),
        }
    }
}

impl AppOptions {
    /// Assemble options from the settings file
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        let remote = &settings.remote;
        Self {
            storage: StorageOptions {
                layout,
                persist_deployments: settings.persist_deployments,
            },
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            workers: dispatcher::Options {
                workers: settings.engine.workers,
                queue_capacity: settings.engine.queue_capacity,
            },
            engine: EngineOptions {
                max_parallel: settings.engine.max_parallel,
                ..Default::default()
            },
            remote: RemoteOptions {
                transport: remote.transport,
                ssh: SshOptions {
                    user: remote.ssh_user.clone(),
                    port: remote.ssh_port,
                    identity_file: remote.identity_file.as_ref().map(PathBuf::from),
                    connect_timeout_secs: remote.connect_timeout_secs,
                    strict_host_key_checking: remote.strict_host_key_checking,
                },
                executor: ExecutorOptions {
                    command_timeout: Duration::from_secs(remote.command_timeout_secs),
                    connect_timeout: Duration::from_secs(remote.connect_timeout_secs),
                    connect_retries: remote.connect_retries,
                    backoff: CooldownOptions {
                        base_delay: Duration::from_millis(remote.backoff_base_ms),
                        max_delay: Duration::from_millis(remote.backoff_max_ms),
                        ..Default::default()
                    },
                    probe_timeout: Duration::from_millis(remote.probe_timeout_ms),
                },
            },
            health: HealthSettings {
                checks: settings.health.checks.clone(),
                check_timeout: Duration::from_secs(settings.health.check_timeout_secs),
                recheck_failed: settings.health.recheck_failed,
                recheck_delay: Duration::from_millis(settings.health.recheck_delay_ms),
            },
            maintenance_windows: settings.maintenance_windows.clone(),
            audit: settings.audit.clone(),
            ..Default::default()
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Write deployment records under the layout's deployment directory
    pub persist_deployments: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist_deployments: true,
        }
    }
}

/// Remote execution options
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    pub transport: TransportKind,
    pub ssh: SshOptions,
    pub executor: ExecutorOptions,
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}
