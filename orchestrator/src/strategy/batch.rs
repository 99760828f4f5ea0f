//! Building blocks shared by the strategies: bounded per-asset fan-out,
//! batch recording, cancel-aware cool-downs

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::models::asset::Asset;
use crate::models::events::{AuditEvent, EventPhase};
use crate::models::execution::Phase;
use crate::strategy::{AssetOutcome, BatchResult, RolloutContext};
use crate::utils::ratio;
use crate::validate::health::{AssetHealth, HealthMode};

/// Run `op` for every asset with at most `max_parallel` in flight.
///
/// Results come back in asset order. A task that panicked yields `None`.
pub async fn run_bounded<T, F, Fut>(assets: &[Arc<Asset>], max_parallel: usize, op: F) -> Vec<Option<T>>
where
    F: Fn(Arc<Asset>) -> Fut,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let mut handles = Vec::with_capacity(assets.len());

    for asset in assets {
        let sem = Arc::clone(&semaphore);
        let task = op(Arc::clone(asset));
        handles.push(tokio::spawn(async move {
            let _permit = sem.acquire_owned().await.ok()?;
            Some(task.await)
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (handle, asset) in handles.into_iter().zip(assets) {
        match handle.await {
            Ok(result) => results.push(result),
            Err(e) => {
                error!(asset_id = %asset.id, "Asset task failed: {}", e);
                results.push(None);
            }
        }
    }
    results
}

/// Apply the patch's forward commands to every asset, then health-check the
/// ones that succeeded when `verify` is set.
pub async fn apply(ctx: &RolloutContext, assets: &[Arc<Asset>], verify: bool) -> Vec<AssetOutcome> {
    let results = run_bounded(assets, ctx.max_parallel, |asset| {
        let ctx = ctx.clone();
        async move { apply_one(&ctx, &asset, verify).await }
    })
    .await;

    results
        .into_iter()
        .zip(assets)
        .map(|(result, asset)| result.unwrap_or_else(|| aborted(asset)))
        .collect()
}

async fn apply_one(ctx: &RolloutContext, asset: &Asset, verify: bool) -> AssetOutcome {
    let execution = ctx
        .executor
        .execute(
            asset,
            &ctx.patch.forward_commands,
            Phase::Forward,
            ctx.command_timeout,
            &ctx.log,
        )
        .await;

    if !execution.success {
        let message = execution.failure_message().unwrap_or_default();
        ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Forward, "failed", message).asset(&asset.id));
        return AssetOutcome {
            asset_id: asset.id.clone(),
            execution: Some(execution),
            health: None,
            anomaly: None,
            succeeded: false,
        };
    }

    ctx.emit(
        AuditEvent::new(
            ctx.deployment_id,
            EventPhase::Forward,
            "succeeded",
            format!("{} commands applied", execution.commands_started),
        )
        .asset(&asset.id),
    );

    let health = if verify {
        Some(check_one(ctx, asset).await)
    } else {
        None
    };
    let succeeded = health.as_ref().map(|h| h.passed).unwrap_or(true);

    AssetOutcome {
        asset_id: asset.id.clone(),
        execution: Some(execution),
        health,
        anomaly: None,
        succeeded,
    }
}

/// Health-check every asset without running anything else
pub async fn verify(ctx: &RolloutContext, assets: &[Arc<Asset>]) -> Vec<AssetHealth> {
    let results = run_bounded(assets, ctx.max_parallel, |asset| {
        let ctx = ctx.clone();
        async move { check_one(&ctx, &asset).await }
    })
    .await;

    results
        .into_iter()
        .zip(assets)
        .map(|(result, asset)| {
            result.unwrap_or_else(|| AssetHealth {
                asset_id: asset.id.clone(),
                mode: HealthMode::PostDeploy,
                passed: false,
                checks: Vec::new(),
                attempts: 0,
                checked_at: Utc::now(),
            })
        })
        .collect()
}

async fn check_one(ctx: &RolloutContext, asset: &Asset) -> AssetHealth {
    let health = ctx
        .health
        .check(asset, &ctx.patch, HealthMode::PostDeploy, &ctx.log)
        .await;
    let (status, message) = if health.passed {
        ("passed", format!("{} checks passed", health.checks.len()))
    } else {
        ("failed", health.failures().join("; "))
    };
    ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Verify, status, message).asset(&asset.id));
    health
}

fn aborted(asset: &Asset) -> AssetOutcome {
    AssetOutcome {
        asset_id: asset.id.clone(),
        execution: None,
        health: None,
        anomaly: Some("asset task aborted".to_string()),
        succeeded: false,
    }
}

/// Record a finished batch and emit its stage event
pub fn record(
    ctx: &RolloutContext,
    index: usize,
    label: String,
    outcomes: Vec<AssetOutcome>,
    started_at: DateTime<Utc>,
    threshold: f64,
) -> BatchResult {
    let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
    let success_rate = ratio(succeeded, outcomes.len());
    let passed = success_rate >= threshold;

    info!(
        deployment_id = %ctx.deployment_id,
        batch = index,
        succeeded,
        total = outcomes.len(),
        "{} finished (success rate {:.2})",
        label,
        success_rate
    );
    ctx.emit(AuditEvent::new(
        ctx.deployment_id,
        EventPhase::Stage,
        if passed { "passed" } else { "failed" },
        format!(
            "{}: {}/{} succeeded (success rate {:.2}, threshold {:.2})",
            label,
            succeeded,
            outcomes.len(),
            success_rate,
            threshold
        ),
    ));

    BatchResult {
        index,
        asset_ids: outcomes.iter().map(|o| o.asset_id.clone()).collect(),
        label,
        outcomes,
        success_rate,
        passed,
        started_at,
        completed_at: Utc::now(),
    }
}

/// Wait between batches. Returns `false` if cancellation arrived first.
pub async fn cooldown(ctx: &RolloutContext, delay: Duration) -> bool {
    if delay.is_zero() {
        return !ctx.cancel.is_cancelled();
    }
    debug!(deployment_id = %ctx.deployment_id, "Cooling down for {:?}", delay);
    tokio::select! {
        _ = tokio::time::sleep(delay) => !ctx.cancel.is_cancelled(),
        _ = ctx.cancel.cancelled() => false,
    }
}

/// Record a cancellation observed at a batch boundary
pub fn cancelled_at(ctx: &RolloutContext, boundary: &str) -> String {
    let reason = format!("cancelled before {}", boundary);
    info!(deployment_id = %ctx.deployment_id, "Rollout {}", reason);
    ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Cancel, "observed", reason.clone()));
    reason
}
