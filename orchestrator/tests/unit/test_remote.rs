//! Remote execution adapter: retries, timeouts and logging

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleetpatch::errors::OrchestratorError;
use fleetpatch::models::execution::{ExecutionFailure, ExecutionLog, Phase};
use fleetpatch::remote::RemoteExecutor;

use crate::support::{assets, executor_options, id, patch, Fleet, FleetTransport};

fn executor(fleet: &Arc<Fleet>) -> RemoteExecutor {
    RemoteExecutor::new(
        Arc::new(FleetTransport {
            fleet: Arc::clone(fleet),
        }),
        executor_options(),
    )
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let fleet = Fleet::new();
    fleet.flaky(&id(0), 2);
    let executor = executor(&fleet);
    let log = ExecutionLog::new();

    let result = executor
        .execute(&assets(1)[0], &patch().forward_commands, Phase::Forward, None, &log)
        .await;

    assert!(result.success);
    assert_eq!(fleet.connects(&id(0)), 3);
    assert_eq!(log.for_asset(&id(0)).len(), 2);
}

#[tokio::test]
async fn test_connect_gives_up_after_configured_retries() {
    let fleet = Fleet::new();
    fleet.flaky(&id(0), 10);
    let executor = executor(&fleet);
    let log = ExecutionLog::new();

    let result = executor
        .execute(&assets(1)[0], &patch().forward_commands, Phase::Forward, None, &log)
        .await;

    assert!(!result.success);
    assert!(matches!(
        result.failure,
        Some(ExecutionFailure::Connection { attempts: 3, .. })
    ));
    assert!(!result.touched());
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_fatal_connect_failure_is_not_retried() {
    let fleet = Fleet::new();
    fleet.unreachable(&id(0));
    let executor = executor(&fleet);

    let err = executor.connect(&assets(1)[0]).await.err().unwrap();

    assert!(matches!(err, OrchestratorError::Connection { .. }));
    assert_eq!(fleet.connects(&id(0)), 1);
}

#[tokio::test]
async fn test_timeout_terminates_the_sequence() {
    let fleet = Fleet::new();
    fleet.latency(&id(0), Duration::from_secs(5));
    let executor = executor(&fleet);
    let log = ExecutionLog::new();

    let started = Instant::now();
    let result = executor
        .execute(
            &assets(1)[0],
            &patch().forward_commands,
            Phase::Forward,
            Some(Duration::from_millis(50)),
            &log,
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(result.failure, Some(ExecutionFailure::Timeout { after_ms: 50 })));
    assert_eq!(result.commands_started, 1);

    // The interrupted command is still logged, without an exit code
    let entries = log.for_asset(&id(0));
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].exit_code, None);
    // Nothing ran on the asset
    assert!(fleet.commands(&id(0)).is_empty());
}

#[tokio::test]
async fn test_sequence_stops_at_first_failure() {
    let fleet = Fleet::new();
    fleet.fail_command(&id(0), "install app=2.0");
    let executor = executor(&fleet);
    let log = ExecutionLog::new();

    let result = executor
        .execute(&assets(1)[0], &patch().forward_commands, Phase::Forward, None, &log)
        .await;

    assert!(!result.success);
    assert_eq!(result.exit_code, Some(1));
    assert_eq!(result.commands_started, 1);
    assert_eq!(fleet.commands(&id(0)), vec!["install app=2.0"]);
    assert_eq!(log.for_phase(Phase::Forward).len(), 1);
}
