//! Deployment records

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::{DeploymentFsm, DeploymentStatus};
use crate::models::asset::Asset;
use crate::models::execution::{ExecutionFailure, Phase};
use crate::models::patch::Patch;
use crate::rollback::RollbackResult;
use crate::strategy::{BatchResult, RollbackScope, Strategy, StrategyResult, Verdict};

/// Per-deployment execution parameters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentParams {
    /// Roll back automatically when the strategy fails
    pub rollback_on_failure: bool,

    /// Which assets an automatic rollback covers
    pub rollback_scope: RollbackScope,

    /// Bound on each asset's command sequence, engine default when absent
    pub command_timeout_ms: Option<u64>,

    /// Bound on concurrent assets, engine default when absent
    pub max_parallel: Option<usize>,
}

impl DeploymentParams {
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_ms.map(Duration::from_millis)
    }
}

/// One entry of a deployment's append-only result history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetResult {
    pub asset_id: String,
    pub phase: Phase,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A deployment, owned by the engine and never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub patch: Patch,
    pub targets: Vec<String>,
    pub assets: Vec<Asset>,
    pub strategy: Strategy,
    pub params: DeploymentParams,

    #[serde(flatten)]
    pub fsm: DeploymentFsm,

    /// Per-asset results, forward then rollback, in the order recorded
    #[serde(default)]
    pub results: Vec<AssetResult>,

    /// Recorded batches or stages of the strategy run
    #[serde(default)]
    pub stages: Vec<BatchResult>,

    /// Assets whose forward commands all exited zero
    #[serde(default)]
    pub patched_assets: Vec<String>,

    /// Assets on which forward commands were started
    #[serde(default)]
    pub touched_assets: Vec<String>,

    /// Every rollback run against this deployment
    #[serde(default)]
    pub rollbacks: Vec<RollbackResult>,

    #[serde(default)]
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Deployment {
    pub fn new(patch: Patch, assets: Vec<Asset>, strategy: Strategy, params: DeploymentParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            targets: assets.iter().map(|a| a.id.clone()).collect(),
            patch,
            assets,
            strategy,
            params,
            fsm: DeploymentFsm::new(),
            results: Vec::new(),
            stages: Vec::new(),
            patched_assets: Vec::new(),
            touched_assets: Vec::new(),
            rollbacks: Vec::new(),
            cancel_requested: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn status(&self) -> DeploymentStatus {
        self.fsm.status()
    }

    pub fn reason(&self) -> Option<&str> {
        self.fsm.reason()
    }

    /// Assets that failed in the latest recorded outcome of the strategy run
    pub fn failed_assets(&self) -> Vec<String> {
        StrategyResult::from_stages(self.stages.clone(), Verdict::Completed).failed_assets
    }

    /// Record a finished strategy run
    pub fn record_strategy(&mut self, result: &StrategyResult) {
        let now = Utc::now();
        for stage in &result.stages {
            for outcome in &stage.outcomes {
                self.results.push(AssetResult {
                    asset_id: outcome.asset_id.clone(),
                    phase: if outcome.execution.is_some() {
                        Phase::Forward
                    } else {
                        Phase::Verify
                    },
                    succeeded: outcome.succeeded,
                    failure: outcome.failure(),
                    message: Some(stage.label.clone()),
                    recorded_at: now,
                });
            }
        }
        self.stages.extend(result.stages.iter().cloned());
        self.patched_assets = result.rollback_targets(RollbackScope::Patched);
        self.touched_assets = result.rollback_targets(RollbackScope::Touched);
    }

    /// Record a finished rollback
    pub fn record_rollback(&mut self, result: RollbackResult) {
        for asset in &result.assets {
            self.results.push(AssetResult {
                asset_id: asset.asset_id.clone(),
                phase: Phase::Rollback,
                succeeded: asset.verified(),
                failure: asset.execution.as_ref().and_then(|e| e.failure.clone()),
                message: Some(asset.message.clone()),
                recorded_at: result.completed_at,
            });
        }
        self.rollbacks.push(result);
    }

    /// Assets a rollback covers when none are named
    pub fn rollback_targets(&self) -> Vec<String> {
        match self.params.rollback_scope {
            RollbackScope::Patched => self.patched_assets.clone(),
            RollbackScope::Touched => self.touched_assets.clone(),
        }
    }
}
