//! Audit events produced for the audit/notification collaborator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Step of the deployment an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Submit,
    Validation,
    Transition,
    Forward,
    Verify,
    Stage,
    Monitor,
    Switch,
    Rollback,
    Cancel,
}

/// A structured audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub deployment_id: Uuid,
    pub phase: EventPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl AuditEvent {
    pub fn new(
        deployment_id: Uuid,
        phase: EventPhase,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            deployment_id,
            phase,
            asset_id: None,
            status: status.into(),
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    /// Attach the asset the event is about
    pub fn asset(mut self, asset_id: &str) -> Self {
        self.asset_id = Some(asset_id.to_string());
        self
    }
}
