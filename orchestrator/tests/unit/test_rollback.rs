//! Explicit rollback of finished deployments

use std::collections::HashSet;

use fleetpatch::deploy::fsm::DeploymentStatus;
use fleetpatch::errors::OrchestratorError;
use fleetpatch::models::deployment::DeploymentParams;
use fleetpatch::models::events::EventPhase;
use fleetpatch::rollback::AssetRollbackStatus;
use fleetpatch::strategy::Strategy;

use crate::support::{assets, id, patch, patch_without_rollback, Harness, SimState, PATCHED_VERSION};

async fn completed(harness: &Harness, count: usize) -> uuid::Uuid {
    let deployment_id = harness
        .engine
        .submit(patch(), assets(count), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;
    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::Completed);
    deployment_id
}

#[tokio::test]
async fn test_rollback_restores_baseline() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 3).await;
    assert_eq!(harness.fleet.state(&id(0)).version, PATCHED_VERSION);

    let result = harness.engine.rollback(deployment_id, None).await.unwrap();

    assert!(result.all_verified);
    assert_eq!(result.status(), DeploymentStatus::RolledBack);
    for n in 0..3 {
        assert_eq!(harness.fleet.state(&id(n)), SimState::default());
    }
    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::RolledBack);
    assert_eq!(deployment.rollbacks.len(), 1);
}

#[tokio::test]
async fn test_repeated_rollback_is_idempotent() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 3).await;

    let first = harness.engine.rollback(deployment_id, None).await.unwrap();
    let second = harness.engine.rollback(deployment_id, None).await.unwrap();

    assert_eq!(first.verification_outcomes(), second.verification_outcomes());
    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::RolledBack);
    assert_eq!(harness.fleet.state(&id(1)), SimState::default());
}

#[tokio::test]
async fn test_missing_rollback_data_leaves_status() {
    let harness = Harness::new();
    let deployment_id = harness
        .engine
        .submit(
            patch_without_rollback(),
            assets(2),
            Strategy::default(),
            DeploymentParams::default(),
        )
        .await
        .unwrap();
    harness.run_next().await;

    let err = harness.engine.rollback(deployment_id, None).await.unwrap_err();

    assert!(matches!(err, OrchestratorError::MissingRollbackData(_)));
    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::Completed);
    assert!(harness.fleet.rolled_back().is_empty());
    let missing: Vec<String> = harness
        .journal
        .for_phase(deployment_id, EventPhase::Rollback)
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(missing, vec!["missing_data"]);
}

#[tokio::test]
async fn test_failed_inverse_command_is_rollback_failed() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 3).await;
    harness.fleet.fail_command(&id(2), "install app=1.0");

    let result = harness.engine.rollback(deployment_id, None).await.unwrap();

    assert!(!result.all_verified);
    assert_eq!(result.failed_assets(), vec![id(2)]);
    let failed = result.assets.iter().find(|a| a.asset_id == id(2)).unwrap();
    assert_eq!(failed.status, AssetRollbackStatus::ExecutionFailed);
    assert!(failed.health.is_none());

    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::RollbackFailed);
    assert!(deployment.reason().unwrap().contains(&id(2)));
}

#[tokio::test]
async fn test_unverified_baseline_is_rollback_failed() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 2).await;
    // The inverse commands exit zero but the service stays down
    harness.fleet.fail_command(&id(0), "systemctl is-active --quiet app");

    let result = harness.engine.rollback(deployment_id, None).await.unwrap();

    let outcome = result.assets.iter().find(|a| a.asset_id == id(0)).unwrap();
    assert_eq!(outcome.status, AssetRollbackStatus::VerificationFailed);
    assert_eq!(result.status(), DeploymentStatus::RollbackFailed);
}

#[tokio::test]
async fn test_rollback_of_named_subset() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 4).await;

    let result = harness
        .engine
        .rollback(deployment_id, Some(vec![id(1), id(3)]))
        .await
        .unwrap();

    assert_eq!(result.assets.len(), 2);
    let expected: HashSet<String> = [id(1), id(3)].into_iter().collect();
    assert_eq!(harness.fleet.rolled_back(), expected);
    assert_eq!(harness.fleet.state(&id(0)).version, PATCHED_VERSION);
}

#[tokio::test]
async fn test_rollback_targets_must_belong_to_deployment() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 2).await;

    let err = harness
        .engine
        .rollback(deployment_id, Some(vec!["db-01".to_string()]))
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::Validation(_)));
    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::Completed);
    assert!(harness.fleet.rolled_back().is_empty());
}

#[tokio::test]
async fn test_pending_deployment_cannot_roll_back() {
    let harness = Harness::new();
    let deployment_id = harness
        .engine
        .submit(patch(), assets(2), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();

    let err = harness.engine.rollback(deployment_id, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_queued_rollback_runs_on_worker() {
    let harness = Harness::new();
    let deployment_id = completed(&harness, 2).await;

    harness.engine.request_rollback(deployment_id, None).unwrap();
    harness.run_next().await;

    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::RolledBack);
}
