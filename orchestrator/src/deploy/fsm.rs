//! Finite State Machine for patch deployments

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    /// Accepted and queued, nothing touched yet
    Pending,

    /// A worker is driving the strategy
    InProgress,

    /// Every required verification passed
    Completed,

    /// The strategy failed, or the deployment was cancelled
    Failed,

    /// Compensating commands ran and re-verified on every targeted asset
    RolledBack,

    /// Rollback ran but at least one asset did not re-verify
    RollbackFailed,
}

impl DeploymentStatus {
    /// Whether no further automatic transition will happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeploymentStatus::Pending | DeploymentStatus::InProgress)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "PENDING",
            DeploymentStatus::InProgress => "IN_PROGRESS",
            DeploymentStatus::Completed => "COMPLETED",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::RolledBack => "ROLLED_BACK",
            DeploymentStatus::RollbackFailed => "ROLLBACK_FAILED",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// A worker picked the deployment up
    Start,

    /// Strategy finished and every verification passed
    Complete,

    /// Strategy failed or was cancelled
    Fail(String),

    /// Rollback executed and verified on every targeted asset
    RollbackSucceeded(String),

    /// Rollback executed but some asset did not verify
    RollbackFailed(String),
}

/// Deployment FSM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    #[serde(default)]
    reason: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in pending state
    pub fn new() -> Self {
        Self {
            status: DeploymentStatus::Pending,
            reason: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Human readable reason for the current status, if any
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Whether an explicit rollback may start from the current status
    pub fn can_rollback(&self) -> bool {
        self.status.is_terminal()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: DeploymentEvent) -> Result<(), OrchestratorError> {
        use DeploymentStatus::*;

        let (status, reason) = match (self.status, &event) {
            // From Pending
            (Pending, DeploymentEvent::Start) => (InProgress, None),
            (Pending, DeploymentEvent::Fail(reason)) => (Failed, Some(reason.clone())),

            // From InProgress
            (InProgress, DeploymentEvent::Complete) => (Completed, None),
            (InProgress, DeploymentEvent::Fail(reason)) => (Failed, Some(reason.clone())),
            (InProgress, DeploymentEvent::RollbackSucceeded(reason)) => {
                (RolledBack, Some(reason.clone()))
            }
            (InProgress, DeploymentEvent::RollbackFailed(reason)) => {
                (RollbackFailed, Some(reason.clone()))
            }

            // Explicit rollback from any end state
            (Completed | Failed | RolledBack | RollbackFailed, DeploymentEvent::RollbackSucceeded(reason)) => {
                (RolledBack, Some(reason.clone()))
            }
            (Completed | Failed | RolledBack | RollbackFailed, DeploymentEvent::RollbackFailed(reason)) => {
                (RollbackFailed, Some(reason.clone()))
            }

            // Invalid transitions
            (status, event) => {
                return Err(OrchestratorError::InvalidTransition(format!(
                    "{} -> {:?}",
                    status, event
                )));
            }
        };

        self.status = status;
        self.reason = reason;
        Ok(())
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
