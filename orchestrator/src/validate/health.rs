//! Post-deployment and rollback health validation
//!
//! The same battery is used to promote stages and to verify rollbacks. In
//! [`HealthMode::Baseline`] the asset is additionally compared against its
//! recorded pre-deployment service and version.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::models::asset::Asset;
use crate::models::execution::{ExecutionLog, Phase};
use crate::models::patch::Patch;
use crate::remote::{Connection, RemoteExecutor};

fn default_http_status() -> u16 {
    200
}

/// One configurable probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HealthCheck {
    /// `systemctl is-active` for the named service, or the asset/patch service
    ServiceActive {
        #[serde(default)]
        service: Option<String>,
    },

    /// TCP port accepts connections
    PortListening { port: u16 },

    /// HTTP GET answers with the expected status. `{host}` is substituted.
    HttpEndpoint {
        url: String,
        #[serde(default = "default_http_status")]
        expect_status: u16,
    },

    /// Installed version, as printed by `command`, equals `expected`
    PackageVersion { command: String, expected: String },

    /// Arbitrary command exits zero on the asset
    Command { command: String },
}

impl HealthCheck {
    fn is_remote(&self) -> bool {
        matches!(
            self,
            HealthCheck::ServiceActive { .. }
                | HealthCheck::PackageVersion { .. }
                | HealthCheck::Command { .. }
        )
    }
}

/// Health validator settings
#[derive(Debug, Clone)]
pub struct HealthSettings {
    /// The battery run on every asset
    pub checks: Vec<HealthCheck>,

    /// Bound on each individual check
    pub check_timeout: Duration,

    /// Re-run a failed battery once before reporting failure
    pub recheck_failed: bool,

    /// Delay before the re-run
    pub recheck_delay: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            checks: vec![HealthCheck::ServiceActive { service: None }],
            check_timeout: Duration::from_secs(30),
            recheck_failed: false,
            recheck_delay: Duration::from_secs(5),
        }
    }
}

/// What the battery is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthMode {
    /// After applying the patch
    PostDeploy,

    /// After a rollback, comparing against the recorded baseline
    Baseline,
}

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl CheckOutcome {
    fn pass(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            detail: detail.into(),
        }
    }

    fn fail(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Health of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHealth {
    pub asset_id: String,
    pub mode: HealthMode,
    pub passed: bool,
    pub checks: Vec<CheckOutcome>,
    pub attempts: u32,
    pub checked_at: DateTime<Utc>,
}

impl AssetHealth {
    /// Failed checks, formatted
    pub fn failures(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect()
    }
}

/// Pre-deployment state an asset is restored to by a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Baseline {
    pub service_name: Option<String>,
    pub version: Option<String>,
}

impl Baseline {
    /// Asset metadata first, patch metadata as fallback
    pub fn resolve(asset: &Asset, patch: &Patch) -> Self {
        Self {
            service_name: asset
                .service_name
                .clone()
                .or_else(|| patch.service_name.clone()),
            version: asset
                .previous_version
                .clone()
                .or_else(|| patch.previous_version.clone()),
        }
    }
}

/// Post-deployment / health validator
pub struct HealthValidator {
    executor: Arc<RemoteExecutor>,
    http: Client,
    settings: HealthSettings,
}

impl HealthValidator {
    pub fn new(executor: Arc<RemoteExecutor>, settings: HealthSettings) -> Result<Self, OrchestratorError> {
        let http = Client::builder().timeout(settings.check_timeout).build()?;
        Ok(Self {
            executor,
            http,
            settings,
        })
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Number of configured checks that apply to `asset` after a deploy. A
    /// `ServiceActive` without a service only applies when the asset or the
    /// patch names one.
    pub fn resolved_checks(&self, asset: &Asset, patch: &Patch) -> usize {
        let baseline = Baseline::resolve(asset, patch);
        self.settings
            .checks
            .iter()
            .filter(|check| match check {
                HealthCheck::ServiceActive { service } => service.is_some() || baseline.service_name.is_some(),
                _ => true,
            })
            .count()
    }

    /// Run the battery on one asset, re-running once if so configured
    pub async fn check(
        &self,
        asset: &Asset,
        patch: &Patch,
        mode: HealthMode,
        log: &ExecutionLog,
    ) -> AssetHealth {
        let mut health = self.run_battery(asset, patch, mode, log, 1).await;
        if !health.passed && self.settings.recheck_failed {
            debug!(asset_id = %asset.id, "Health check failed, re-checking once");
            tokio::time::sleep(self.settings.recheck_delay).await;
            health = self.run_battery(asset, patch, mode, log, 2).await;
        }
        health
    }

    async fn run_battery(
        &self,
        asset: &Asset,
        patch: &Patch,
        mode: HealthMode,
        log: &ExecutionLog,
        attempt: u32,
    ) -> AssetHealth {
        let baseline = Baseline::resolve(asset, patch);
        let baseline_version = match (&patch.version_command, &baseline.version) {
            (Some(command), Some(version)) if mode == HealthMode::Baseline => {
                Some((command.clone(), version.clone()))
            }
            _ => None,
        };
        let baseline_service = match mode {
            HealthMode::Baseline => baseline.service_name.clone(),
            HealthMode::PostDeploy => None,
        };

        let needs_remote = self.settings.checks.iter().any(HealthCheck::is_remote)
            || baseline_version.is_some()
            || baseline_service.is_some();

        let mut checks = Vec::new();
        let mut conn = None;
        if needs_remote {
            match self.executor.connect(asset).await {
                Ok(c) => conn = Some(c),
                Err(e) => checks.push(CheckOutcome::fail("connect", e.to_string())),
            }
        }

        let mut service_checked = false;
        for check in &self.settings.checks {
            let outcome = match check {
                HealthCheck::ServiceActive { service } => {
                    let Some(service) = service.clone().or_else(|| baseline.service_name.clone())
                    else {
                        continue;
                    };
                    service_checked |= baseline.service_name.as_deref() == Some(service.as_str());
                    self.service_active(conn.as_mut(), asset, &service, log).await
                }
                HealthCheck::PortListening { port } => self.port_listening(asset, *port).await,
                HealthCheck::HttpEndpoint { url, expect_status } => {
                    self.http_endpoint(asset, url, *expect_status).await
                }
                HealthCheck::PackageVersion { command, expected } => {
                    self.version_matches(conn.as_mut(), asset, command, expected, log).await
                }
                HealthCheck::Command { command } => {
                    self.command_succeeds(conn.as_mut(), asset, command, log).await
                }
            };
            checks.push(outcome);
        }

        if let Some(service) = baseline_service {
            if !service_checked {
                checks.push(self.service_active(conn.as_mut(), asset, &service, log).await);
            }
        }

        if let Some((command, expected)) = baseline_version {
            checks.push(self.version_matches(conn.as_mut(), asset, &command, &expected, log).await);
        }

        if let Some(conn) = conn {
            conn.close().await;
        }

        // Nothing compared means nothing verified
        if checks.is_empty() {
            let name = match mode {
                HealthMode::PostDeploy => "health",
                HealthMode::Baseline => "baseline",
            };
            checks.push(CheckOutcome::fail(name, "no health check resolved for this asset"));
        }

        let passed = checks.iter().all(|c| c.passed);
        if !passed {
            warn!(asset_id = %asset.id, ?mode, attempt, "Health check failed");
        }

        AssetHealth {
            asset_id: asset.id.clone(),
            mode,
            passed,
            checks,
            attempts: attempt,
            checked_at: Utc::now(),
        }
    }

    async fn run_remote(
        &self,
        conn: Option<&mut Box<dyn Connection>>,
        asset: &Asset,
        command: &str,
        log: &ExecutionLog,
    ) -> Result<crate::remote::CommandOutput, String> {
        let Some(conn) = conn else {
            return Err("no connection".to_string());
        };
        self.executor
            .run_logged(
                conn.as_mut(),
                asset,
                command,
                Phase::Verify,
                self.settings.check_timeout,
                log,
            )
            .await
            .map_err(|e| e.to_string())
    }

    async fn service_active(
        &self,
        conn: Option<&mut Box<dyn Connection>>,
        asset: &Asset,
        service: &str,
        log: &ExecutionLog,
    ) -> CheckOutcome {
        let name = format!("service_active:{}", service);
        let command = format!("systemctl is-active --quiet {}", service);
        match self.run_remote(conn, asset, &command, log).await {
            Ok(output) if output.success() => CheckOutcome::pass(name, "active"),
            Ok(output) => CheckOutcome::fail(name, format!("inactive (exit {})", output.exit_code)),
            Err(e) => CheckOutcome::fail(name, e),
        }
    }

    async fn command_succeeds(
        &self,
        conn: Option<&mut Box<dyn Connection>>,
        asset: &Asset,
        command: &str,
        log: &ExecutionLog,
    ) -> CheckOutcome {
        let name = format!("command:{}", command);
        match self.run_remote(conn, asset, command, log).await {
            Ok(output) if output.success() => CheckOutcome::pass(name, "exit 0"),
            Ok(output) => CheckOutcome::fail(name, format!("exit {}", output.exit_code)),
            Err(e) => CheckOutcome::fail(name, e),
        }
    }

    async fn version_matches(
        &self,
        conn: Option<&mut Box<dyn Connection>>,
        asset: &Asset,
        command: &str,
        expected: &str,
        log: &ExecutionLog,
    ) -> CheckOutcome {
        let name = "version_matches";
        match self.run_remote(conn, asset, command, log).await {
            Ok(output) if output.success() && output.stdout.trim() == expected => {
                CheckOutcome::pass(name, expected)
            }
            Ok(output) if output.success() => CheckOutcome::fail(
                name,
                format!("expected {}, found {}", expected, output.stdout.trim()),
            ),
            Ok(output) => CheckOutcome::fail(name, format!("exit {}", output.exit_code)),
            Err(e) => CheckOutcome::fail(name, e),
        }
    }

    async fn port_listening(&self, asset: &Asset, port: u16) -> CheckOutcome {
        let name = format!("port_listening:{}", port);
        let addr = format!("{}:{}", asset.host(), port);
        match tokio::time::timeout(self.settings.check_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => CheckOutcome::pass(name, "open"),
            Ok(Err(e)) => CheckOutcome::fail(name, e.to_string()),
            Err(_) => CheckOutcome::fail(name, "timed out"),
        }
    }

    async fn http_endpoint(&self, asset: &Asset, url: &str, expect_status: u16) -> CheckOutcome {
        let url = url.replace("{host}", asset.host());
        let name = format!("http_endpoint:{}", url);
        match self.http.get(&url).send().await {
            Ok(response) if response.status().as_u16() == expect_status => {
                CheckOutcome::pass(name, response.status().to_string())
            }
            Ok(response) => CheckOutcome::fail(
                name,
                format!("expected {}, got {}", expect_status, response.status()),
            ),
            Err(e) => CheckOutcome::fail(name, e.to_string()),
        }
    }
}
