//! Rollout strategies
//!
//! Each strategy is a function over an injected [`RolloutContext`]. None of
//! them touches engine state: they return a [`StrategyResult`] and the engine
//! decides what the deployment becomes.

pub mod all_at_once;
pub mod batch;
pub mod blue_green;
pub mod canary;
pub mod rolling;
pub mod switch;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::EventSink;
use crate::deploy::cancel::CancelToken;
use crate::errors::ValidationFailure;
use crate::models::asset::Asset;
use crate::models::events::AuditEvent;
use crate::models::execution::{ExecutionFailure, ExecutionLog, ExecutionResult};
use crate::models::patch::Patch;
use crate::monitor::AnomalySource;
use crate::remote::RemoteExecutor;
use crate::validate::health::{AssetHealth, HealthValidator};

pub use all_at_once::AllAtOnceParams;
pub use blue_green::BlueGreenParams;
pub use canary::CanaryParams;
pub use rolling::RollingParams;
pub use switch::{InMemorySwitch, TrafficSwitch};

/// Strategy and its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    AllAtOnce(AllAtOnceParams),
    Rolling(RollingParams),
    Canary(CanaryParams),
    BlueGreen(BlueGreenParams),
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::AllAtOnce(AllAtOnceParams::default())
    }
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::AllAtOnce(_) => "all_at_once",
            Strategy::Rolling(_) => "rolling",
            Strategy::Canary(_) => "canary",
            Strategy::BlueGreen(_) => "blue_green",
        }
    }

    /// Check the parameters against the target set
    pub fn validate(&self, assets: &[Asset]) -> Vec<ValidationFailure> {
        match self {
            Strategy::AllAtOnce(params) => params.validate(),
            Strategy::Rolling(params) => params.validate(),
            Strategy::Canary(params) => params.validate(),
            Strategy::BlueGreen(params) => params.validate(assets),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Collaborators a strategy runs against
#[derive(Clone)]
pub struct RolloutContext {
    pub deployment_id: Uuid,
    pub patch: Arc<Patch>,
    pub executor: Arc<RemoteExecutor>,
    pub health: Arc<HealthValidator>,
    pub monitor: Arc<dyn AnomalySource>,
    pub switch: Arc<dyn TrafficSwitch>,
    pub events: Arc<dyn EventSink>,
    pub log: Arc<ExecutionLog>,
    pub cancel: CancelToken,

    /// Upper bound on concurrent per-asset operations
    pub max_parallel: usize,

    /// Bound on each asset's forward command sequence
    pub command_timeout: Option<Duration>,
}

impl RolloutContext {
    pub fn emit(&self, event: AuditEvent) {
        self.events.emit(event);
    }
}

/// How a strategy run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every stage met its policy
    Completed,

    /// A stage failed its policy; remaining stages were skipped
    Failed { reason: String },

    /// Stopped at a batch boundary on request
    Cancelled { reason: String },

    /// Blue/green failed before the switch; the inactive pool was discarded
    Discarded { reason: String },

    /// Blue/green failed after the switch and the pointer was reverted
    Reverted { reason: String },

    /// Blue/green failed after the switch and the pointer could not be reverted
    RevertFailed { reason: String },
}

impl Verdict {
    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Completed => None,
            Verdict::Failed { reason }
            | Verdict::Cancelled { reason }
            | Verdict::Discarded { reason }
            | Verdict::Reverted { reason }
            | Verdict::RevertFailed { reason } => Some(reason),
        }
    }
}

/// Outcome of one asset within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    pub asset_id: String,

    /// Forward execution, absent when nothing was run (verification only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionResult>,

    /// Health verdict, absent when forward execution failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<AssetHealth>,

    /// Anomaly reported by monitoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<String>,

    pub succeeded: bool,
}

impl AssetOutcome {
    /// Forward commands all exited zero
    pub fn patched(&self) -> bool {
        self.execution.as_ref().map(|e| e.success).unwrap_or(false)
    }

    /// At least one forward command was started
    pub fn touched(&self) -> bool {
        self.execution.as_ref().map(|e| e.touched()).unwrap_or(false)
    }

    /// Why the asset failed
    pub fn failure(&self) -> Option<ExecutionFailure> {
        if self.succeeded {
            return None;
        }
        if let Some(failure) = self.execution.as_ref().and_then(|e| e.failure.clone()) {
            return Some(failure);
        }
        let mut checks = self.health.as_ref().map(|h| h.failures()).unwrap_or_default();
        if let Some(anomaly) = &self.anomaly {
            checks.push(format!("anomaly: {}", anomaly));
        }
        Some(ExecutionFailure::Unhealthy { checks })
    }
}

/// One batch or stage, fully recorded before the next one starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub index: usize,
    pub label: String,
    pub asset_ids: Vec<String>,
    pub outcomes: Vec<AssetOutcome>,
    pub success_rate: f64,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    pub fn failed_ids(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded)
            .map(|o| o.asset_id.clone())
            .collect()
    }
}

/// Which assets an automatic rollback is applied to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackScope {
    /// Assets whose forward commands all succeeded
    #[default]
    Patched,

    /// Assets on which any forward command was started
    Touched,
}

/// Result of a strategy run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    pub succeeded_assets: Vec<String>,
    pub failed_assets: Vec<String>,
    pub stages: Vec<BatchResult>,
    pub verdict: Verdict,
}

impl StrategyResult {
    /// Build the result from recorded stages. An asset's latest outcome wins.
    pub fn from_stages(stages: Vec<BatchResult>, verdict: Verdict) -> Self {
        let mut order: Vec<String> = Vec::new();
        let mut latest = std::collections::HashMap::new();
        for stage in &stages {
            for outcome in &stage.outcomes {
                if !latest.contains_key(&outcome.asset_id) {
                    order.push(outcome.asset_id.clone());
                }
                latest.insert(outcome.asset_id.clone(), outcome.succeeded);
            }
        }

        let (succeeded_assets, failed_assets) = order
            .into_iter()
            .partition(|id| latest.get(id).copied().unwrap_or(false));

        Self {
            succeeded_assets,
            failed_assets,
            stages,
            verdict,
        }
    }

    /// Assets that received forward commands and must be reverted
    pub fn rollback_targets(&self, scope: RollbackScope) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for outcome in self.stages.iter().flat_map(|s| s.outcomes.iter()) {
            let selected = match scope {
                RollbackScope::Patched => outcome.patched(),
                RollbackScope::Touched => outcome.touched(),
            };
            if selected && seen.insert(outcome.asset_id.clone()) {
                targets.push(outcome.asset_id.clone());
            }
        }
        targets
    }

    /// Number of assets that forward commands were started on
    pub fn contacted(&self) -> usize {
        self.rollback_targets(RollbackScope::Touched).len()
    }
}

/// Run the strategy over the assets
pub async fn execute(strategy: &Strategy, assets: &[Arc<Asset>], ctx: &RolloutContext) -> StrategyResult {
    match strategy {
        Strategy::AllAtOnce(params) => all_at_once::run(params, assets, ctx).await,
        Strategy::Rolling(params) => rolling::run(params, assets, ctx).await,
        Strategy::Canary(params) => canary::run(params, assets, ctx).await,
        Strategy::BlueGreen(params) => blue_green::run(params, assets, ctx).await,
    }
}
