//! Pre-deployment readiness checks
//!
//! Nothing here runs a command on an asset. Static checks run first, so a
//! request that is rejected for its own content never probes the fleet.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, info};

use crate::errors::{OrchestratorError, ValidationFailure};
use crate::models::asset::Asset;
use crate::models::patch::{ApprovalStatus, Patch, TestStatus};
use crate::remote::RemoteExecutor;
use crate::strategy::Strategy;
use crate::validate::health::HealthValidator;
use crate::validate::window::{within_any, MaintenanceWindow};

/// Pre-deployment validator
pub struct PreValidator {
    executor: Arc<RemoteExecutor>,
    health: Arc<HealthValidator>,
    windows: Vec<MaintenanceWindow>,
}

impl PreValidator {
    pub fn new(
        executor: Arc<RemoteExecutor>,
        health: Arc<HealthValidator>,
        windows: Vec<MaintenanceWindow>,
    ) -> Self {
        Self {
            executor,
            health,
            windows,
        }
    }

    /// Run every check. Any failure aborts with the full list of reasons.
    pub async fn validate(
        &self,
        patch: &Patch,
        assets: &[Asset],
        strategy: &Strategy,
        rollback_on_failure: bool,
        now: DateTime<Utc>,
    ) -> Result<(), OrchestratorError> {
        let mut failures = self.static_checks(patch, assets, strategy, rollback_on_failure, now);
        if !failures.is_empty() {
            info!(patch_id = %patch.id, failures = failures.len(), "Pre-deployment validation failed");
            return Err(OrchestratorError::Validation(failures));
        }

        failures.extend(self.probe_all(assets).await);
        if !failures.is_empty() {
            info!(patch_id = %patch.id, unreachable = failures.len(), "Pre-deployment probes failed");
            return Err(OrchestratorError::Validation(failures));
        }

        debug!(patch_id = %patch.id, assets = assets.len(), "Pre-deployment validation passed");
        Ok(())
    }

    /// Checks over the request content alone
    pub fn static_checks(
        &self,
        patch: &Patch,
        assets: &[Asset],
        strategy: &Strategy,
        rollback_on_failure: bool,
        now: DateTime<Utc>,
    ) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();

        if assets.is_empty() {
            failures.push(ValidationFailure::new("assets", "no target assets given"));
        }
        let mut seen = HashSet::new();
        for asset in assets {
            if !seen.insert(asset.id.as_str()) {
                failures.push(ValidationFailure::for_asset(
                    "assets",
                    &asset.id,
                    "asset listed more than once",
                ));
            }
        }

        if patch.forward_commands.iter().all(|c| c.trim().is_empty()) {
            failures.push(ValidationFailure::new("forward_commands", "patch has no forward commands"));
        }
        if patch.test_status != TestStatus::Passed {
            failures.push(ValidationFailure::new(
                "test_status",
                format!("patch test status is {:?}, expected Passed", patch.test_status),
            ));
        }
        if patch.approval != ApprovalStatus::Approved {
            failures.push(ValidationFailure::new(
                "approval",
                format!("patch approval is {:?}, expected Approved", patch.approval),
            ));
        } else if !patch.is_intact() {
            failures.push(ValidationFailure::new(
                "integrity",
                "patch content does not match its approved digest",
            ));
        }
        if rollback_on_failure && !patch.has_rollback_data() {
            failures.push(ValidationFailure::new(
                "rollback_commands",
                "rollback_on_failure requested but the patch has no rollback commands",
            ));
        }

        match within_any(&self.windows, now) {
            Ok(true) => {}
            Ok(false) => failures.push(ValidationFailure::new(
                "maintenance_window",
                format!("{} is outside every maintenance window", now.format("%a %H:%M UTC")),
            )),
            Err(e) => failures.push(ValidationFailure::new("maintenance_window", e)),
        }

        for asset in assets {
            if self.health.resolved_checks(asset, patch) == 0 {
                failures.push(ValidationFailure::for_asset(
                    "health_checks",
                    &asset.id,
                    "no health check resolves for this asset; name a service on the asset or patch, or configure another check",
                ));
            }
        }

        failures.extend(strategy.validate(assets));
        failures
    }

    async fn probe_all(&self, assets: &[Asset]) -> Vec<ValidationFailure> {
        let probes = assets.iter().map(|asset| async move {
            self.executor
                .probe(asset)
                .await
                .err()
                .map(|e| ValidationFailure::for_asset("connectivity", &asset.id, e))
        });
        join_all(probes).await.into_iter().flatten().collect()
    }
}
