//! Deploy to the idle pool, then flip the traffic pointer

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ValidationFailure;
use crate::models::asset::{Asset, Pool, POOL_TAG};
use crate::models::events::{AuditEvent, EventPhase};
use crate::strategy::{batch, AssetOutcome, RolloutContext, StrategyResult, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlueGreenParams {
    /// Traffic group; defaults to the patch's service name
    pub group: Option<String>,

    /// Fraction of the idle pool that must pass before switching
    pub switch_threshold: f64,

    /// Wait after the switch before re-verifying
    pub validation_period_ms: u64,

    /// Re-verify the new active pool after the switch
    pub verify_after_switch: bool,
}

impl Default for BlueGreenParams {
    fn default() -> Self {
        Self {
            group: None,
            switch_threshold: 1.0,
            validation_period_ms: 30_000,
            verify_after_switch: true,
        }
    }
}

impl BlueGreenParams {
    pub fn validate(&self, assets: &[Asset]) -> Vec<ValidationFailure> {
        let mut failures: Vec<ValidationFailure> = assets
            .iter()
            .filter(|a| a.pool().is_none())
            .map(|a| {
                ValidationFailure::for_asset(
                    "strategy",
                    &a.id,
                    format!("blue_green needs a `{}` tag of blue or green", POOL_TAG),
                )
            })
            .collect();
        if !(0.0..=1.0).contains(&self.switch_threshold) {
            failures.push(ValidationFailure::new("strategy", "switch_threshold must be in [0, 1]"));
        }
        failures
    }
}

pub async fn run(params: &BlueGreenParams, assets: &[Arc<Asset>], ctx: &RolloutContext) -> StrategyResult {
    let group = params
        .group
        .clone()
        .or_else(|| ctx.patch.service_name.clone())
        .unwrap_or_else(|| "default".to_string());

    let active = match ctx.switch.active(&group).await {
        Ok(pool) => pool,
        Err(e) => {
            let reason = format!("cannot read active pool of {}: {}", group, e);
            return StrategyResult::from_stages(Vec::new(), Verdict::Failed { reason });
        }
    };
    let idle = active.other();
    let targets: Vec<Arc<Asset>> = assets
        .iter()
        .filter(|a| a.pool() == Some(idle))
        .cloned()
        .collect();

    if targets.is_empty() {
        let reason = format!("no assets in the {} pool of {}", idle, group);
        return StrategyResult::from_stages(Vec::new(), Verdict::Failed { reason });
    }
    if ctx.cancel.is_cancelled() {
        let reason = batch::cancelled_at(ctx, &format!("deploying the {} pool", idle));
        return StrategyResult::from_stages(Vec::new(), Verdict::Cancelled { reason });
    }

    info!(deployment_id = %ctx.deployment_id, %group, %active, "Deploying to the {} pool", idle);
    let started_at = Utc::now();
    let outcomes = batch::apply(ctx, &targets, true).await;
    let deploy = batch::record(
        ctx,
        0,
        format!("deploy {} pool", idle),
        outcomes,
        started_at,
        params.switch_threshold,
    );

    if !deploy.passed {
        let reason = format!(
            "{} pool success rate {:.2} is below threshold {:.2}, pool discarded",
            idle, deploy.success_rate, params.switch_threshold
        );
        discard(ctx, &group, idle, &reason);
        return StrategyResult::from_stages(vec![deploy], Verdict::Discarded { reason });
    }

    if ctx.cancel.is_cancelled() {
        let reason = batch::cancelled_at(ctx, "the traffic switch");
        discard(ctx, &group, idle, &reason);
        return StrategyResult::from_stages(vec![deploy], Verdict::Cancelled { reason });
    }

    if let Err(e) = ctx.switch.switch(&group, idle).await {
        let reason = format!("switch to {} failed: {}", idle, e);
        ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Switch, "failed", reason.clone()));
        discard(ctx, &group, idle, &reason);
        return StrategyResult::from_stages(vec![deploy], Verdict::Discarded { reason });
    }
    ctx.emit(AuditEvent::new(
        ctx.deployment_id,
        EventPhase::Switch,
        "switched",
        format!("{} traffic moved from {} to {}", group, active, idle),
    ));

    if !params.verify_after_switch {
        return StrategyResult::from_stages(vec![deploy], Verdict::Completed);
    }

    tokio::time::sleep(Duration::from_millis(params.validation_period_ms)).await;
    let started_at = Utc::now();
    let outcomes = batch::verify(ctx, &targets)
        .await
        .into_iter()
        .map(|health| AssetOutcome {
            asset_id: health.asset_id.clone(),
            execution: None,
            succeeded: health.passed,
            health: Some(health),
            anomaly: None,
        })
        .collect();
    let live = batch::record(
        ctx,
        1,
        format!("verify {} pool after switch", idle),
        outcomes,
        started_at,
        params.switch_threshold,
    );

    if live.passed {
        return StrategyResult::from_stages(vec![deploy, live], Verdict::Completed);
    }

    warn!(deployment_id = %ctx.deployment_id, %group, "Post-switch verification failed, reverting to {}", active);
    let verdict = match ctx.switch.switch(&group, active).await {
        Ok(()) => {
            let reason = format!(
                "{} pool failed after the switch (success rate {:.2}), traffic reverted to {}",
                idle, live.success_rate, active
            );
            ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Switch, "reverted", reason.clone()));
            Verdict::Reverted { reason }
        }
        Err(e) => {
            let reason = format!("{} pool failed after the switch and revert to {} failed: {}", idle, active, e);
            ctx.emit(AuditEvent::new(ctx.deployment_id, EventPhase::Switch, "revert_failed", reason.clone()));
            Verdict::RevertFailed { reason }
        }
    };
    StrategyResult::from_stages(vec![deploy, live], verdict)
}

/// The idle pool never took traffic, so there is nothing to revert. The
/// event keeps the audit trail in line with the other strategies.
fn discard(ctx: &RolloutContext, group: &str, pool: Pool, reason: &str) {
    ctx.emit(AuditEvent::new(
        ctx.deployment_id,
        EventPhase::Rollback,
        "discarded",
        format!("{} pool of {} discarded: {}", pool, group, reason),
    ));
}
