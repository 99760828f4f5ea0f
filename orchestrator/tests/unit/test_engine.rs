//! Deployment engine lifecycle over the simulated fleet

use std::collections::HashSet;

use fleetpatch::deploy::fsm::DeploymentStatus;
use fleetpatch::errors::OrchestratorError;
use fleetpatch::models::deployment::DeploymentParams;
use fleetpatch::models::events::EventPhase;
use fleetpatch::models::execution::Phase;
use fleetpatch::strategy::{BlueGreenParams, CanaryParams, Strategy};

use crate::support::{assets, id, patch, pooled_assets, Harness, BASELINE_VERSION, PATCHED_VERSION};

fn canary() -> Strategy {
    Strategy::Canary(CanaryParams {
        stages: vec![0.1, 0.5, 1.0],
        monitor_ms: 0,
        success_threshold: 0.8,
        poll_interval_ms: 1,
    })
}

fn blue_green() -> Strategy {
    Strategy::BlueGreen(BlueGreenParams {
        validation_period_ms: 0,
        ..Default::default()
    })
}

fn transitions(harness: &Harness, id: uuid::Uuid) -> Vec<String> {
    harness
        .journal
        .for_phase(id, EventPhase::Transition)
        .into_iter()
        .map(|e| e.status)
        .collect()
}

#[tokio::test]
async fn test_submit_then_complete() {
    let harness = Harness::new();
    let id = harness
        .engine
        .submit(patch(), assets(4), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();

    // Queued, nothing has run yet
    assert_eq!(harness.deployment(id).status(), DeploymentStatus::Pending);
    assert!(harness.fleet.calls().is_empty());

    harness.run_next().await;

    let deployment = harness.deployment(id);
    assert_eq!(deployment.status(), DeploymentStatus::Completed);
    assert!(deployment.started_at.is_some());
    assert!(deployment.completed_at.is_some());
    assert_eq!(deployment.patched_assets.len(), 4);
    for n in 0..4 {
        assert_eq!(harness.fleet.state(&crate::support::id(n)).version, PATCHED_VERSION);
    }
    assert_eq!(transitions(&harness, id), vec!["IN_PROGRESS", "COMPLETED"]);

    let forward = harness
        .engine
        .logs(id)
        .unwrap()
        .into_iter()
        .filter(|e| e.phase == Phase::Forward)
        .count();
    assert_eq!(forward, 8);
}

#[tokio::test]
async fn test_failed_assets_are_enumerated() {
    let harness = Harness::new();
    harness.fleet.fail_command(&id(3), "install app=2.0");
    harness.fleet.fail_command(&id(7), "install app=2.0");

    let deployment_id = harness
        .engine
        .submit(patch(), assets(10), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;

    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::Failed);
    assert_eq!(deployment.failed_assets(), vec![id(3), id(7)]);
    assert_eq!(deployment.patched_assets.len(), 8);
    // No rollback was asked for
    assert!(harness.fleet.rolled_back().is_empty());
    assert!(deployment.rollbacks.is_empty());
}

#[tokio::test]
async fn test_canary_failure_rolls_back_exposed_assets_only() {
    let harness = Harness::new();
    for n in [0, 4, 9] {
        harness.fleet.crash_when_patched(&id(n));
    }
    let params = DeploymentParams {
        rollback_on_failure: true,
        ..Default::default()
    };

    let deployment_id = harness
        .engine
        .submit(patch(), assets(100), canary(), params)
        .await
        .unwrap();
    harness.run_next().await;

    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::RolledBack);

    let stage_one: HashSet<String> = (0..10).map(id).collect();
    assert_eq!(harness.fleet.rolled_back(), stage_one);
    assert_eq!(harness.fleet.contacted(), stage_one);
    for n in 0..10 {
        let state = harness.fleet.state(&id(n));
        assert!(state.active);
        assert_eq!(state.version, BASELINE_VERSION);
    }

    assert_eq!(deployment.rollbacks.len(), 1);
    assert!(deployment.rollbacks[0].all_verified);
    assert_eq!(transitions(&harness, deployment_id), vec!["IN_PROGRESS", "ROLLED_BACK"]);
}

#[tokio::test]
async fn test_cancel_before_start() {
    let harness = Harness::new();
    let deployment_id = harness
        .engine
        .submit(patch(), assets(3), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();

    harness.engine.cancel(deployment_id).unwrap();
    harness.run_next().await;

    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::Failed);
    assert!(deployment.reason().unwrap().contains("cancelled"));
    assert!(deployment.cancel_requested);
    assert!(harness.fleet.contacted().is_empty());

    let err = harness.engine.cancel(deployment_id).unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
}

#[tokio::test]
async fn test_overlapping_deployment_of_same_patch_is_refused() {
    let harness = Harness::new();
    let first = harness
        .engine
        .submit(patch(), assets(3), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();

    let err = harness
        .engine
        .submit(patch(), assets(2), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Conflict(_)));
    assert_eq!(harness.engine.list().len(), 1);

    // Assets are free again once the first deployment ends
    harness.run_next().await;
    assert_eq!(harness.deployment(first).status(), DeploymentStatus::Completed);
    harness
        .engine
        .submit(patch(), assets(2), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unknown_deployment_is_not_found() {
    let harness = Harness::new();
    let missing = uuid::Uuid::new_v4();

    assert!(matches!(
        harness.engine.get_status(missing),
        Err(OrchestratorError::NotFound(_))
    ));
    assert!(matches!(harness.engine.logs(missing), Err(OrchestratorError::NotFound(_))));
    assert!(matches!(harness.engine.cancel(missing), Err(OrchestratorError::NotFound(_))));
}

#[tokio::test]
async fn test_blue_green_revert_ends_rolled_back() {
    let harness = Harness::new();
    harness
        .fleet
        .fail_command_after("green-0", "systemctl is-active --quiet app", 1);

    let deployment_id = harness
        .engine
        .submit(patch(), pooled_assets(2, 2), blue_green(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;

    assert_eq!(harness.deployment(deployment_id).status(), DeploymentStatus::RolledBack);
}

#[tokio::test]
async fn test_blue_green_discard_ends_failed() {
    let harness = Harness::new();
    harness.fleet.fail_command("green-1", "install app=2.0");

    let deployment_id = harness
        .engine
        .submit(patch(), pooled_assets(2, 2), blue_green(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;

    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::Failed);
    assert!(harness
        .fleet
        .contacted()
        .iter()
        .all(|a| a.starts_with("green")));
}

#[tokio::test]
async fn test_recover_interrupted_marks_unfinished_failed() {
    let harness = Harness::new();
    let deployment_id = harness
        .engine
        .submit(patch(), assets(2), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();

    assert_eq!(harness.engine.recover_interrupted().await, 1);
    let deployment = harness.deployment(deployment_id);
    assert_eq!(deployment.status(), DeploymentStatus::Failed);
    assert!(deployment.reason().unwrap().starts_with("interrupted"));
    assert_eq!(harness.engine.recover_interrupted().await, 0);
}
