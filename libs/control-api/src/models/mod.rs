//! Control surface request and response bodies

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Returned by `POST /deployments` once the job is queued
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub deployment_id: Uuid,
    pub status: String,
}

/// Optional body of `POST /deployments/{id}/rollback`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// Restrict the rollback to these assets. All patched assets when absent.
    #[serde(default)]
    pub asset_ids: Option<Vec<String>>,
}

/// Returned by cancel and rollback requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub deployment_id: Uuid,
    pub accepted: bool,
    pub message: String,
}

/// Compact listing entry for `GET /deployments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSummary {
    pub id: Uuid,
    pub patch_id: String,
    pub strategy: String,
    pub status: String,
    pub targets: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Listing response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentList {
    pub deployments: Vec<DeploymentSummary>,
    pub total: usize,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}
