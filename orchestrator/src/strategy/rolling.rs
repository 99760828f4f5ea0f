//! Fixed-size batches in strict sequence with a cool-down in between

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::ValidationFailure;
use crate::models::asset::Asset;
use crate::strategy::{batch, RolloutContext, StrategyResult, Verdict};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingParams {
    pub batch_size: usize,

    /// Wait between batches
    pub cooldown_ms: u64,

    /// Failed assets tolerated over the whole rollout
    pub max_failures: usize,

    /// Advance past a batch with failures, as long as `max_failures` holds
    pub continue_on_error: bool,
}

impl Default for RollingParams {
    fn default() -> Self {
        Self {
            batch_size: 5,
            cooldown_ms: 30_000,
            max_failures: 0,
            continue_on_error: false,
        }
    }
}

impl RollingParams {
    pub fn validate(&self) -> Vec<ValidationFailure> {
        if self.batch_size == 0 {
            vec![ValidationFailure::new("strategy", "batch_size must be at least 1")]
        } else {
            Vec::new()
        }
    }

    /// Number of batches for `total` assets
    pub fn batch_count(&self, total: usize) -> usize {
        total.div_ceil(self.batch_size.max(1))
    }
}

pub async fn run(params: &RollingParams, assets: &[Arc<Asset>], ctx: &RolloutContext) -> StrategyResult {
    let batch_size = params.batch_size.max(1);
    let total_batches = params.batch_count(assets.len());
    let cooldown = Duration::from_millis(params.cooldown_ms);

    let mut stages = Vec::with_capacity(total_batches);
    let mut failures = 0;

    for (index, chunk) in assets.chunks(batch_size).enumerate() {
        let label = format!("batch {}/{}", index + 1, total_batches);

        if index > 0 && !batch::cooldown(ctx, cooldown).await {
            let reason = batch::cancelled_at(ctx, &label);
            return StrategyResult::from_stages(stages, Verdict::Cancelled { reason });
        }
        if ctx.cancel.is_cancelled() {
            let reason = batch::cancelled_at(ctx, &label);
            return StrategyResult::from_stages(stages, Verdict::Cancelled { reason });
        }

        let started_at = Utc::now();
        let outcomes = batch::apply(ctx, chunk, true).await;
        let stage = batch::record(ctx, index, label.clone(), outcomes, started_at, 1.0);

        let batch_failures = stage.failed_ids().len();
        failures += batch_failures;
        stages.push(stage);

        if failures > params.max_failures {
            warn!(deployment_id = %ctx.deployment_id, failures, "Rolling deployment exceeded max_failures");
            let reason = format!(
                "{} failed assets exceed max_failures {} at {}",
                failures, params.max_failures, label
            );
            return StrategyResult::from_stages(stages, Verdict::Failed { reason });
        }
        if batch_failures > 0 && !params.continue_on_error {
            let reason = format!("{} had {} failed assets", label, batch_failures);
            return StrategyResult::from_stages(stages, Verdict::Failed { reason });
        }
    }

    StrategyResult::from_stages(stages, Verdict::Completed)
}
