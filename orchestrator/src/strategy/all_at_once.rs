//! All targets in one bounded-parallel batch

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::ValidationFailure;
use crate::models::asset::Asset;
use crate::strategy::{batch, RolloutContext, StrategyResult, Verdict};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllAtOnceParams {
    /// Overrides the engine's parallelism bound for this deployment
    pub max_parallel: Option<usize>,
}

impl AllAtOnceParams {
    pub fn validate(&self) -> Vec<ValidationFailure> {
        match self.max_parallel {
            Some(0) => vec![ValidationFailure::new("strategy", "max_parallel must be at least 1")],
            _ => Vec::new(),
        }
    }
}

pub async fn run(params: &AllAtOnceParams, assets: &[Arc<Asset>], ctx: &RolloutContext) -> StrategyResult {
    if ctx.cancel.is_cancelled() {
        let reason = batch::cancelled_at(ctx, "the rollout");
        return StrategyResult::from_stages(Vec::new(), Verdict::Cancelled { reason });
    }

    let mut ctx = ctx.clone();
    if let Some(max_parallel) = params.max_parallel {
        ctx.max_parallel = max_parallel;
    }

    let started_at = Utc::now();
    let outcomes = batch::apply(&ctx, assets, true).await;
    let stage = batch::record(&ctx, 0, "all assets".to_string(), outcomes, started_at, 1.0);

    let verdict = if stage.passed {
        Verdict::Completed
    } else {
        let failed = stage.failed_ids();
        Verdict::Failed {
            reason: format!("{} of {} assets failed: {}", failed.len(), stage.outcomes.len(), failed.join(", ")),
        }
    };
    StrategyResult::from_stages(vec![stage], verdict)
}
