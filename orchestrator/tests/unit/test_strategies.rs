//! Strategy executors driven directly over the simulated fleet

use std::collections::HashSet;

use fleetpatch::models::asset::Pool;
use fleetpatch::models::events::EventPhase;
use fleetpatch::models::execution::ExecutionFailure;
use fleetpatch::strategy::{
    self, AllAtOnceParams, BlueGreenParams, CanaryParams, RollbackScope, RollingParams, Strategy, Verdict,
};
use fleetpatch::validate::health::HealthSettings;

use crate::support::{arcs, assets, health_settings, id, patch, pooled_assets, Harness, PATCHED_VERSION};

fn rolling(batch_size: usize, max_failures: usize, continue_on_error: bool) -> Strategy {
    Strategy::Rolling(RollingParams {
        batch_size,
        cooldown_ms: 0,
        max_failures,
        continue_on_error,
    })
}

fn canary(stages: Vec<f64>) -> Strategy {
    Strategy::Canary(CanaryParams {
        stages,
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

// ================================== ALL AT ONCE ================================== //

#[tokio::test]
async fn test_all_at_once_two_failures_enumerated() {
    let harness = Harness::new();
    harness.fleet.fail_command(&id(3), "install app=2.0");
    harness.fleet.fail_command(&id(7), "install app=2.0");
    let ctx = harness.context(patch());

    let result = strategy::execute(&Strategy::AllAtOnce(AllAtOnceParams::default()), &arcs(assets(10)), &ctx).await;

    assert_eq!(result.succeeded_assets.len(), 8);
    assert_eq!(result.failed_assets, vec![id(3), id(7)]);
    assert_eq!(result.stages.len(), 1);
    assert_eq!(result.stages[0].success_rate, 0.8);
    match &result.verdict {
        Verdict::Failed { reason } => {
            assert!(reason.contains("asset-03"));
            assert!(reason.contains("asset-07"));
        }
        other => panic!("unexpected verdict {:?}", other),
    }

    let failed = result.stages[0]
        .outcomes
        .iter()
        .find(|o| o.asset_id == id(3))
        .unwrap();
    assert!(matches!(
        failed.failure(),
        Some(ExecutionFailure::NonZeroExit { exit_code: 1, .. })
    ));
    // The failing asset stopped at its first command
    assert_eq!(harness.fleet.commands(&id(3)), vec!["install app=2.0"]);
}

#[tokio::test]
async fn test_all_at_once_success_verifies_every_asset() {
    let harness = Harness::new();
    let ctx = harness.context(patch());

    let result = strategy::execute(&Strategy::default(), &arcs(assets(4)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(result.succeeded_assets.len(), 4);
    for outcome in &result.stages[0].outcomes {
        let health = outcome.health.as_ref().expect("health recorded");
        assert!(health.passed);
        assert_eq!(harness.fleet.state(&outcome.asset_id).version, PATCHED_VERSION);
    }
}

#[tokio::test]
async fn test_unhealthy_asset_counts_as_failed() {
    let harness = Harness::new();
    harness.fleet.crash_when_patched(&id(1));
    let ctx = harness.context(patch());

    let result = strategy::execute(&Strategy::default(), &arcs(assets(3)), &ctx).await;

    assert_eq!(result.failed_assets, vec![id(1)]);
    let outcome = &result.stages[0].outcomes[1];
    assert!(outcome.patched());
    assert!(matches!(outcome.failure(), Some(ExecutionFailure::Unhealthy { .. })));
    // Forward commands succeeded, so the asset is a rollback target
    assert!(result.rollback_targets(RollbackScope::Patched).contains(&id(1)));
}

// ==================================== ROLLING ==================================== //

#[tokio::test]
async fn test_rolling_batches_run_in_strict_sequence() {
    let harness = Harness::new();
    let ctx = harness.context(patch());

    let result = strategy::execute(&rolling(3, 0, false), &arcs(assets(7)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(result.stages.len(), 3);
    assert_eq!(result.stages[2].asset_ids, vec![id(6)]);

    for pair in result.stages.windows(2) {
        assert!(pair[0].completed_at <= pair[1].started_at);
    }

    // Every call of batch k precedes every call of batch k+1
    let calls = harness.fleet.calls();
    let batch_of = |asset: &str| -> usize {
        result
            .stages
            .iter()
            .position(|s| s.asset_ids.iter().any(|a| a == asset))
            .unwrap()
    };
    let batches: Vec<usize> = calls.iter().map(|(asset, _)| batch_of(asset)).collect();
    assert!(batches.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_rolling_aborts_once_failures_exceed_max() {
    let harness = Harness::new();
    harness.fleet.fail_command(&id(0), "install app=2.0");
    harness.fleet.fail_command(&id(3), "install app=2.0");
    let ctx = harness.context(patch());

    let result = strategy::execute(&rolling(2, 1, true), &arcs(assets(6)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert_eq!(result.stages.len(), 2);
    assert_eq!(result.failed_assets, vec![id(0), id(3)]);

    let contacted = harness.fleet.contacted();
    assert!(!contacted.contains(&id(4)));
    assert!(!contacted.contains(&id(5)));
}

#[tokio::test]
async fn test_rolling_tolerated_failure_completes() {
    let harness = Harness::new();
    harness.fleet.fail_command(&id(0), "install app=2.0");
    let ctx = harness.context(patch());

    let result = strategy::execute(&rolling(2, 1, true), &arcs(assets(6)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(result.stages.len(), 3);
    assert_eq!(result.failed_assets, vec![id(0)]);
    assert_eq!(result.succeeded_assets.len(), 5);
}

#[tokio::test]
async fn test_rolling_stops_on_failed_batch_without_continue_on_error() {
    let harness = Harness::new();
    harness.fleet.fail_command(&id(1), "install app=2.0");
    let ctx = harness.context(patch());

    let result = strategy::execute(&rolling(2, 5, false), &arcs(assets(6)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert_eq!(result.stages.len(), 1);
    assert_eq!(harness.fleet.contacted().len(), 2);
}

#[tokio::test]
async fn test_rolling_observes_cancel_at_batch_boundary() {
    let harness = Harness::new();
    let ctx = harness.context(patch());
    ctx.cancel.cancel();

    let result = strategy::execute(&rolling(2, 0, false), &arcs(assets(4)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Cancelled { .. }));
    assert!(result.stages.is_empty());
    assert!(harness.fleet.contacted().is_empty());
    let cancel_events = harness
        .journal
        .for_phase(ctx.deployment_id, EventPhase::Cancel);
    assert_eq!(cancel_events.len(), 1);
}

// ===================================== CANARY ==================================== //

#[tokio::test]
async fn test_canary_promotes_past_tolerated_stage_failure() {
    let harness = Harness::new();
    harness.fleet.crash_when_patched(&id(5));
    let ctx = harness.context(patch());

    let result = strategy::execute(&canary(vec![0.1, 0.5, 1.0]), &arcs(assets(20)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(result.stages.len(), 3);
    assert_eq!(result.stages[0].asset_ids.len(), 2);
    assert_eq!(result.stages[0].success_rate, 1.0);
    assert_eq!(result.stages[1].asset_ids.len(), 10);
    assert_eq!(result.stages[1].success_rate, 0.9);
    assert_eq!(result.stages[2].asset_ids.len(), 20);
    assert_eq!(result.failed_assets, vec![id(5)]);
    assert_eq!(result.succeeded_assets.len(), 19);

    // The failed asset is recorded, never retried
    let installs = harness
        .fleet
        .commands(&id(5))
        .into_iter()
        .filter(|c| c == "install app=2.0")
        .count();
    assert_eq!(installs, 1);
}

#[tokio::test]
async fn test_canary_failed_first_stage_never_reaches_second() {
    let harness = Harness::new();
    for n in [0, 4, 9] {
        harness.fleet.crash_when_patched(&id(n));
    }
    let ctx = harness.context(patch());

    let result = strategy::execute(&canary(vec![0.1, 0.5, 1.0]), &arcs(assets(100)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert_eq!(result.stages.len(), 1);
    assert!((result.stages[0].success_rate - 0.7).abs() < 1e-9);

    let stage_one: HashSet<String> = (0..10).map(id).collect();
    assert_eq!(harness.fleet.contacted(), stage_one);

    let targets: HashSet<String> = result
        .rollback_targets(RollbackScope::Patched)
        .into_iter()
        .collect();
    assert_eq!(targets, stage_one);
}

#[tokio::test]
async fn test_canary_anomaly_fails_stage() {
    let harness = Harness::new();
    harness.anomalies.report(&id(1), "error rate 12%");
    harness.anomalies.report(&id(2), "p99 latency 4s");
    let ctx = harness.context(patch());

    let result = strategy::execute(&canary(vec![0.5, 1.0]), &arcs(assets(10)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert_eq!(result.stages.len(), 1);
    assert!((result.stages[0].success_rate - 0.6).abs() < 1e-9);

    let outcome = &result.stages[0].outcomes[1];
    assert_eq!(outcome.anomaly.as_deref(), Some("error rate 12%"));
    assert!(matches!(outcome.failure(), Some(ExecutionFailure::Unhealthy { .. })));
    assert_eq!(
        harness
            .journal
            .for_phase(ctx.deployment_id, EventPhase::Monitor)
            .len(),
        2
    );
}

// =================================== BLUE/GREEN ================================== //

#[tokio::test]
async fn test_blue_green_deploys_idle_pool_and_switches() {
    let harness = Harness::new();
    let ctx = harness.context(patch());

    let result = strategy::execute(&blue_green(), &arcs(pooled_assets(2, 2)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(harness.switch.get("app"), Pool::Green);
    assert_eq!(result.succeeded_assets, vec!["green-0", "green-1"]);
    assert!(harness.fleet.contacted().iter().all(|a| a.starts_with("green")));

    let switched = harness.journal.for_phase(ctx.deployment_id, EventPhase::Switch);
    assert_eq!(switched.len(), 1);
    assert_eq!(switched[0].status, "switched");
}

#[tokio::test]
async fn test_blue_green_discards_idle_pool_before_switch() {
    let harness = Harness::new();
    harness.fleet.fail_command("green-1", "install app=2.0");
    let ctx = harness.context(patch());

    let result = strategy::execute(&blue_green(), &arcs(pooled_assets(2, 2)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Discarded { .. }));
    assert_eq!(harness.switch.get("app"), Pool::Blue);
    assert!(harness.fleet.rolled_back().is_empty());

    let rollback_events = harness.journal.for_phase(ctx.deployment_id, EventPhase::Rollback);
    assert_eq!(rollback_events.len(), 1);
    assert_eq!(rollback_events[0].status, "discarded");
}

#[tokio::test]
async fn test_blue_green_reverts_pointer_after_failed_switch_verification() {
    let harness = Harness::new();
    harness
        .fleet
        .fail_command_after("green-0", "systemctl is-active --quiet app", 1);
    let ctx = harness.context(patch());

    let result = strategy::execute(&blue_green(), &arcs(pooled_assets(2, 2)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Reverted { .. }));
    assert_eq!(result.stages.len(), 2);
    assert_eq!(harness.switch.get("app"), Pool::Blue);
    // The pointer revert runs no compensating commands
    assert!(harness.fleet.rolled_back().is_empty());

    let statuses: Vec<String> = harness
        .journal
        .for_phase(ctx.deployment_id, EventPhase::Switch)
        .into_iter()
        .map(|e| e.status)
        .collect();
    assert_eq!(statuses, vec!["switched", "reverted"]);
}

// ================================ HEALTH CHECKS ================================== //

#[tokio::test]
async fn test_asset_without_resolved_health_check_is_not_reported_healthy() {
    let harness = Harness::new();
    harness.fleet.crash_when_patched(&id(0));
    let mut unnamed = patch();
    unnamed.service_name = None;
    let ctx = harness.context(unnamed);

    let result = strategy::execute(&Strategy::AllAtOnce(AllAtOnceParams::default()), &arcs(assets(3)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert!(result.succeeded_assets.is_empty());
    assert_eq!(result.failed_assets, vec![id(0), id(1), id(2)]);
    for outcome in &result.stages[0].outcomes {
        let health = outcome.health.as_ref().unwrap();
        assert!(!health.passed);
        assert_eq!(health.checks.len(), 1);
        assert_eq!(health.checks[0].name, "health");
    }
    // No service was named, so nothing was asked of systemd
    assert!(harness
        .fleet
        .calls()
        .iter()
        .all(|(_, command)| !command.starts_with("systemctl")));
}

#[tokio::test]
async fn test_recheck_recovers_asset_failing_its_first_battery() {
    let harness = Harness::with_health(HealthSettings {
        recheck_failed: true,
        ..health_settings()
    });
    harness
        .fleet
        .fail_command_times(&id(1), "systemctl is-active --quiet app", 1);
    let ctx = harness.context(patch());

    let result = strategy::execute(&Strategy::AllAtOnce(AllAtOnceParams::default()), &arcs(assets(3)), &ctx).await;

    assert_eq!(result.verdict, Verdict::Completed);
    assert_eq!(result.succeeded_assets.len(), 3);
    assert_eq!(result.stages[0].success_rate, 1.0);
    let attempts: Vec<u32> = result.stages[0]
        .outcomes
        .iter()
        .map(|o| o.health.as_ref().unwrap().attempts)
        .collect();
    assert_eq!(attempts, vec![1, 2, 1]);
}

#[tokio::test]
async fn test_first_failed_battery_counts_without_recheck() {
    let harness = Harness::with_health(health_settings());
    harness
        .fleet
        .fail_command_times(&id(1), "systemctl is-active --quiet app", 1);
    let ctx = harness.context(patch());

    let result = strategy::execute(&Strategy::AllAtOnce(AllAtOnceParams::default()), &arcs(assets(3)), &ctx).await;

    assert!(matches!(result.verdict, Verdict::Failed { .. }));
    assert_eq!(result.failed_assets, vec![id(1)]);
    let failed = result.stages[0]
        .outcomes
        .iter()
        .find(|o| o.asset_id == id(1))
        .unwrap();
    assert_eq!(failed.health.as_ref().unwrap().attempts, 1);
    // The service came up fine; only the single battery run saw it down
    assert_eq!(
        harness
            .fleet
            .commands(&id(1))
            .iter()
            .filter(|c| c.starts_with("systemctl"))
            .count(),
        1
    );
}
