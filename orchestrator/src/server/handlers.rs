//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use control_api::{
    AcceptedResponse, DeploymentList, DeploymentSummary, ErrorResponse, HealthResponse, RollbackRequest,
    SubmitResponse, VersionResponse,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::OrchestratorError;
use crate::models::asset::Asset;
use crate::models::deployment::{Deployment, DeploymentParams};
use crate::models::patch::Patch;
use crate::server::state::ServerState;
use crate::strategy::Strategy;
use crate::utils::version_info;

/// Error body with the status code of its taxonomy
pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.0.kind().to_string(),
            message: self.0.to_string(),
            reasons: self.0.reasons(),
        };
        (self.0.http_status(), Json(body)).into_response()
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "fleetpatch".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Body of `POST /deployments`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub patch: Patch,
    pub assets: Vec<Asset>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub params: DeploymentParams,
}

/// Submit handler. Returns as soon as the deployment is queued.
pub async fn submit_handler(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state
        .engine
        .submit(request.patch, request.assets, request.strategy, request.params)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            deployment_id: id,
            status: DeploymentStatus::Pending.to_string(),
        }),
    ))
}

fn summarize(deployment: &Deployment) -> DeploymentSummary {
    DeploymentSummary {
        id: deployment.id,
        patch_id: deployment.patch.id.clone(),
        strategy: deployment.strategy.name().to_string(),
        status: deployment.status().to_string(),
        targets: deployment.targets.len(),
        created_at: deployment.created_at,
        completed_at: deployment.completed_at,
    }
}

/// List handler
pub async fn list_deployments_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let deployments: Vec<DeploymentSummary> = state.engine.list().iter().map(summarize).collect();
    Json(DeploymentList {
        total: deployments.len(),
        deployments,
    })
}

/// Full deployment record
pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.get_status(id)?))
}

/// Cancel handler
pub async fn cancel_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state.engine.cancel(id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            deployment_id: id,
            accepted: true,
            message: "cancellation requested, observed at the next batch boundary".to_string(),
        }),
    ))
}

/// Rollback handler. The body is optional.
pub async fn rollback_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: RollbackRequest = if body.is_empty() {
        RollbackRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(OrchestratorError::from)?
    };

    state.engine.request_rollback(id, request.asset_ids)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            deployment_id: id,
            accepted: true,
            message: "rollback queued".to_string(),
        }),
    ))
}

/// Audit events of a deployment
pub async fn events_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.engine.store().contains(id) {
        return Err(OrchestratorError::NotFound(format!("deployment {}", id)).into());
    }
    Ok(Json(state.journal.for_deployment(id)))
}

/// Execution log of a deployment
pub async fn logs_handler(
    State(state): State<Arc<ServerState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.engine.logs(id)?))
}
