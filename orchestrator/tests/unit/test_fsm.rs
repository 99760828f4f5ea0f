//! FSM unit tests

use fleetpatch::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use fleetpatch::errors::OrchestratorError;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeploymentFsm::new();
    assert_eq!(fsm.status(), DeploymentStatus::Pending);
    assert!(fsm.reason().is_none());
    assert!(!fsm.can_rollback());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = DeploymentFsm::new();

    fsm.process(DeploymentEvent::Start).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::InProgress);
    assert!(!fsm.status().is_terminal());

    fsm.process(DeploymentEvent::Complete).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Completed);
    assert!(fsm.can_rollback());
}

#[test]
fn test_fsm_failed_then_rolled_back() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Fail("batch 2/4 had 1 failed assets".to_string()))
        .unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Failed);
    assert_eq!(fsm.reason(), Some("batch 2/4 had 1 failed assets"));

    fsm.process(DeploymentEvent::RollbackSucceeded("3 assets rolled back".to_string()))
        .unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::RolledBack);

    // Re-running a rollback on an end state is allowed and stays terminal
    fsm.process(DeploymentEvent::RollbackFailed("asset-01 did not verify".to_string()))
        .unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::RollbackFailed);
}

#[test]
fn test_fsm_terminal_states_do_not_restart() {
    let mut fsm = DeploymentFsm::new();
    fsm.process(DeploymentEvent::Start).unwrap();
    fsm.process(DeploymentEvent::Complete).unwrap();

    for event in [
        DeploymentEvent::Start,
        DeploymentEvent::Complete,
        DeploymentEvent::Fail("late".to_string()),
    ] {
        let err = fsm.process(event).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidTransition(_)));
    }
    assert_eq!(fsm.status(), DeploymentStatus::Completed);
}

#[test]
fn test_fsm_pending_cannot_complete_or_roll_back() {
    let mut fsm = DeploymentFsm::new();
    assert!(fsm.process(DeploymentEvent::Complete).is_err());
    assert!(fsm
        .process(DeploymentEvent::RollbackSucceeded("nothing ran".to_string()))
        .is_err());
    assert_eq!(fsm.status(), DeploymentStatus::Pending);

    fsm.process(DeploymentEvent::Fail("cancelled before start".to_string()))
        .unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Failed);
}

#[test]
fn test_status_wire_names() {
    assert_eq!(
        serde_json::to_string(&DeploymentStatus::RollbackFailed).unwrap(),
        "\"ROLLBACK_FAILED\""
    );
    assert_eq!(DeploymentStatus::InProgress.to_string(), "IN_PROGRESS");
}
