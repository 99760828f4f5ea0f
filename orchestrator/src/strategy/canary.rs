//! Progressive exposure in stages of increasing asset fraction
//!
//! Each stage patches only the assets it adds, then watches every exposed
//! asset for the monitor window and health-checks it again. The stage passes
//! when the success rate over the exposed assets reaches the threshold;
//! otherwise the remaining stages are skipped. Failed assets stay failed and
//! are never retried.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ValidationFailure;
use crate::models::asset::Asset;
use crate::models::events::{AuditEvent, EventPhase};
use crate::strategy::{batch, AssetOutcome, RolloutContext, StrategyResult, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanaryParams {
    /// Cumulative fraction of the fleet exposed by each stage
    pub stages: Vec<f64>,

    /// Observation window after each stage
    pub monitor_ms: u64,

    /// Minimum fraction of the exposed assets that must succeed
    pub success_threshold: f64,

    /// How often the monitoring source is polled during the window
    pub poll_interval_ms: u64,
}

impl Default for CanaryParams {
    fn default() -> Self {
        Self {
            stages: vec![0.1, 0.5, 1.0],
            monitor_ms: 60_000,
            success_threshold: 0.8,
            poll_interval_ms: 5_000,
        }
    }
}

impl CanaryParams {
    pub fn validate(&self) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        if self.stages.is_empty() {
            failures.push(ValidationFailure::new("strategy", "canary needs at least one stage"));
        }
        if self.stages.iter().any(|f| !(*f > 0.0 && *f <= 1.0)) {
            failures.push(ValidationFailure::new("strategy", "canary stage fractions must be in (0, 1]"));
        }
        if self.stages.windows(2).any(|w| w[1] <= w[0]) {
            failures.push(ValidationFailure::new("strategy", "canary stage fractions must increase"));
        }
        if self.stages.last().is_some_and(|last| *last != 1.0) {
            failures.push(ValidationFailure::new("strategy", "the last canary stage must be 1.0"));
        }
        if !(0.0..=1.0).contains(&self.success_threshold) {
            failures.push(ValidationFailure::new("strategy", "success_threshold must be in [0, 1]"));
        }
        failures
    }

    /// Cumulative asset count reached by each stage
    pub fn stage_bounds(&self, total: usize) -> Vec<usize> {
        let mut bounds = Vec::with_capacity(self.stages.len());
        let mut previous = 0;
        for fraction in &self.stages {
            let reach = ((fraction * total as f64 - 1e-9).ceil() as usize).clamp(1, total.max(1));
            let reach = reach.max(previous).min(total);
            bounds.push(reach);
            previous = reach;
        }
        bounds
    }
}

pub async fn run(params: &CanaryParams, assets: &[Arc<Asset>], ctx: &RolloutContext) -> StrategyResult {
    let bounds = params.stage_bounds(assets.len());
    let total_stages = bounds.len();
    let mut stages = Vec::with_capacity(total_stages);
    let mut exposed: Vec<AssetOutcome> = Vec::new();

    for (index, reach) in bounds.into_iter().enumerate() {
        let label = format!("stage {}/{} ({:.0}%)", index + 1, total_stages, params.stages[index] * 100.0);
        if reach == exposed.len() {
            debug!(deployment_id = %ctx.deployment_id, "{} adds no assets, skipping", label);
            continue;
        }
        if ctx.cancel.is_cancelled() {
            let reason = batch::cancelled_at(ctx, &label);
            return StrategyResult::from_stages(stages, Verdict::Cancelled { reason });
        }

        let started_at = Utc::now();
        let new_assets = &assets[exposed.len()..reach];
        exposed.extend(batch::apply(ctx, new_assets, false).await);

        let stage_assets = &assets[..reach];
        monitor(ctx, params, stage_assets, &mut exposed).await;
        health_check(ctx, stage_assets, &mut exposed).await;

        let stage = batch::record(ctx, index, label.clone(), exposed.clone(), started_at, params.success_threshold);
        let passed = stage.passed;
        let success_rate = stage.success_rate;
        stages.push(stage);

        if !passed {
            warn!(deployment_id = %ctx.deployment_id, success_rate, "Canary {} below threshold", label);
            let reason = format!(
                "{} success rate {:.2} is below threshold {:.2}",
                label, success_rate, params.success_threshold
            );
            return StrategyResult::from_stages(stages, Verdict::Failed { reason });
        }
    }

    StrategyResult::from_stages(stages, Verdict::Completed)
}

/// Poll the monitoring source for the patched assets until the window closes
async fn monitor(ctx: &RolloutContext, params: &CanaryParams, assets: &[Arc<Asset>], outcomes: &mut [AssetOutcome]) {
    let window = Duration::from_millis(params.monitor_ms);
    let interval = Duration::from_millis(params.poll_interval_ms.max(1));
    let deadline = tokio::time::Instant::now() + window;

    loop {
        for (asset, outcome) in assets.iter().zip(outcomes.iter_mut()) {
            if !outcome.succeeded || outcome.anomaly.is_some() {
                continue;
            }
            if let Some(anomaly) = ctx.monitor.anomaly(asset).await {
                warn!(deployment_id = %ctx.deployment_id, asset_id = %asset.id, "Anomaly: {}", anomaly);
                ctx.emit(
                    AuditEvent::new(ctx.deployment_id, EventPhase::Monitor, "anomaly", anomaly.clone())
                        .asset(&asset.id),
                );
                outcome.anomaly = Some(anomaly);
                outcome.succeeded = false;
            }
        }

        let now = tokio::time::Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Health-check the assets that are still in good standing after monitoring
async fn health_check(ctx: &RolloutContext, assets: &[Arc<Asset>], outcomes: &mut [AssetOutcome]) {
    let pending: Vec<Arc<Asset>> = assets
        .iter()
        .zip(outcomes.iter())
        .filter(|(_, o)| o.succeeded)
        .map(|(a, _)| Arc::clone(a))
        .collect();

    let results = batch::verify(ctx, &pending).await;
    for health in results {
        if let Some(outcome) = outcomes.iter_mut().find(|o| o.asset_id == health.asset_id) {
            outcome.succeeded = health.passed;
            outcome.health = Some(health);
        }
    }
}
