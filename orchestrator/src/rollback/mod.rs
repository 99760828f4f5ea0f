//! Rollback engine: runs a patch's recorded inverse commands and verifies
//! each asset against its pre-deployment baseline
//!
//! A rollback is never reported as successful unless the inverse commands
//! ran and the baseline verification passed on every targeted asset.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::EventSink;
use crate::deploy::fsm::DeploymentStatus;
use crate::errors::{OrchestratorError, ValidationFailure};
use crate::models::asset::Asset;
use crate::models::events::{AuditEvent, EventPhase};
use crate::models::execution::{ExecutionLog, ExecutionResult, Phase};
use crate::models::patch::Patch;
use crate::remote::RemoteExecutor;
use crate::strategy::batch::run_bounded;
use crate::validate::health::{AssetHealth, HealthMode, HealthValidator};

/// Outcome of rolling back one asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetRollbackStatus {
    /// Inverse commands ran and the baseline re-verified
    RolledBack,

    /// An inverse command failed, timed out, or the asset was unreachable
    ExecutionFailed,

    /// Inverse commands ran but the baseline did not verify
    VerificationFailed,
}

/// Per-asset rollback record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRollback {
    pub asset_id: String,
    pub status: AssetRollbackStatus,
    pub execution: Option<ExecutionResult>,
    pub health: Option<AssetHealth>,
    pub message: String,
}

impl AssetRollback {
    pub fn verified(&self) -> bool {
        self.status == AssetRollbackStatus::RolledBack
    }
}

/// Result of one rollback invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub deployment_id: Uuid,
    pub assets: Vec<AssetRollback>,
    pub all_verified: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RollbackResult {
    /// Deployment status this rollback leads to
    pub fn status(&self) -> DeploymentStatus {
        if self.all_verified {
            DeploymentStatus::RolledBack
        } else {
            DeploymentStatus::RollbackFailed
        }
    }

    /// Assets that need manual intervention
    pub fn failed_assets(&self) -> Vec<String> {
        self.assets
            .iter()
            .filter(|a| !a.verified())
            .map(|a| a.asset_id.clone())
            .collect()
    }

    /// Asset id and verification verdict, in target order
    pub fn verification_outcomes(&self) -> Vec<(String, bool)> {
        self.assets
            .iter()
            .map(|a| (a.asset_id.clone(), a.verified()))
            .collect()
    }

    /// `RollbackVerification` naming every asset that did not re-verify
    pub fn ensure_verified(&self) -> Result<(), OrchestratorError> {
        if self.all_verified {
            Ok(())
        } else {
            Err(OrchestratorError::RollbackVerification(self.failed_assets()))
        }
    }

    /// Human readable summary
    pub fn summary(&self) -> String {
        let failed = self.failed_assets();
        if failed.is_empty() {
            format!("rolled back and verified {} assets", self.assets.len())
        } else {
            format!(
                "rollback failed on {} of {} assets: {}",
                failed.len(),
                self.assets.len(),
                failed.join(", ")
            )
        }
    }
}

/// Rollback engine
#[derive(Clone)]
pub struct RollbackEngine {
    executor: Arc<RemoteExecutor>,
    health: Arc<HealthValidator>,
    events: Arc<dyn EventSink>,
    max_parallel: usize,
    command_timeout: Option<Duration>,
}

impl RollbackEngine {
    pub fn new(
        executor: Arc<RemoteExecutor>,
        health: Arc<HealthValidator>,
        events: Arc<dyn EventSink>,
        max_parallel: usize,
        command_timeout: Option<Duration>,
    ) -> Self {
        Self {
            executor,
            health,
            events,
            max_parallel,
            command_timeout,
        }
    }

    /// Roll `assets` back to their baseline.
    ///
    /// Fails with `MissingRollbackData` before contacting anything when the
    /// patch carries no inverse commands.
    pub async fn execute_rollback(
        &self,
        deployment_id: Uuid,
        patch: &Arc<Patch>,
        assets: &[Arc<Asset>],
        log: &Arc<ExecutionLog>,
    ) -> Result<RollbackResult, OrchestratorError> {
        if !patch.has_rollback_data() {
            self.events.emit(AuditEvent::new(
                deployment_id,
                EventPhase::Rollback,
                "missing_data",
                format!("patch {} has no rollback commands", patch.id),
            ));
            return Err(OrchestratorError::MissingRollbackData(patch.id.clone()));
        }
        if assets.is_empty() {
            return Err(OrchestratorError::Validation(vec![ValidationFailure::new(
                "rollback",
                "no assets to roll back",
            )]));
        }

        info!(%deployment_id, patch_id = %patch.id, assets = assets.len(), "Starting rollback");
        self.events.emit(AuditEvent::new(
            deployment_id,
            EventPhase::Rollback,
            "started",
            format!("rolling back {} assets", assets.len()),
        ));

        let started_at = Utc::now();
        let results = run_bounded(assets, self.max_parallel, |asset| {
            let engine = self.clone();
            let patch = Arc::clone(patch);
            let log = Arc::clone(log);
            async move { engine.rollback_one(deployment_id, &patch, &asset, &log).await }
        })
        .await;

        let assets: Vec<AssetRollback> = results
            .into_iter()
            .zip(assets)
            .map(|(result, asset)| {
                result.unwrap_or_else(|| AssetRollback {
                    asset_id: asset.id.clone(),
                    status: AssetRollbackStatus::ExecutionFailed,
                    execution: None,
                    health: None,
                    message: "rollback task aborted".to_string(),
                })
            })
            .collect();

        let all_verified = assets.iter().all(AssetRollback::verified);
        let result = RollbackResult {
            deployment_id,
            assets,
            all_verified,
            started_at,
            completed_at: Utc::now(),
        };

        let summary = result.summary();
        if all_verified {
            info!(%deployment_id, "{}", summary);
        } else {
            warn!(%deployment_id, "{}", summary);
        }
        self.events.emit(AuditEvent::new(
            deployment_id,
            EventPhase::Rollback,
            result.status().as_str(),
            summary,
        ));
        Ok(result)
    }

    async fn rollback_one(
        &self,
        deployment_id: Uuid,
        patch: &Patch,
        asset: &Asset,
        log: &ExecutionLog,
    ) -> AssetRollback {
        let execution = self
            .executor
            .execute(
                asset,
                &patch.rollback_commands,
                Phase::Rollback,
                self.command_timeout,
                log,
            )
            .await;

        let record = if !execution.success {
            AssetRollback {
                asset_id: asset.id.clone(),
                status: AssetRollbackStatus::ExecutionFailed,
                message: execution.failure_message().unwrap_or_default(),
                execution: Some(execution),
                health: None,
            }
        } else {
            let health = self.health.check(asset, patch, HealthMode::Baseline, log).await;
            if health.passed {
                AssetRollback {
                    asset_id: asset.id.clone(),
                    status: AssetRollbackStatus::RolledBack,
                    message: "baseline verified".to_string(),
                    execution: Some(execution),
                    health: Some(health),
                }
            } else {
                AssetRollback {
                    asset_id: asset.id.clone(),
                    status: AssetRollbackStatus::VerificationFailed,
                    message: health.failures().join("; "),
                    execution: Some(execution),
                    health: Some(health),
                }
            }
        };

        let status = match record.status {
            AssetRollbackStatus::RolledBack => "rolled_back",
            AssetRollbackStatus::ExecutionFailed => "failed",
            AssetRollbackStatus::VerificationFailed => "verification_failed",
        };
        self.events.emit(
            AuditEvent::new(deployment_id, EventPhase::Rollback, status, record.message.clone())
                .asset(&asset.id),
        );
        record
    }
}
