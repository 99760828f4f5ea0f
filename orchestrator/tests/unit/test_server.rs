//! HTTP control surface

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use control_api::{AcceptedResponse, DeploymentList, ErrorResponse, HealthResponse, SubmitResponse};
use fleetpatch::models::deployment::DeploymentParams;
use fleetpatch::models::patch::{Patch, TestStatus};
use fleetpatch::server::handlers::SubmitRequest;
use fleetpatch::server::serve::router;
use fleetpatch::server::state::ServerState;
use fleetpatch::strategy::Strategy;

use crate::support::{assets, patch, patch_without_rollback, Harness};

fn app(harness: &Harness) -> Router {
    router(Arc::new(ServerState::new(
        Arc::clone(&harness.engine),
        Arc::clone(&harness.journal),
    )))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            request = request.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&value).unwrap())
        }
        None => Body::empty(),
    };
    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

fn submit_body(patch: Patch) -> serde_json::Value {
    serde_json::to_value(SubmitRequest {
        patch,
        assets: assets(2),
        strategy: Strategy::default(),
        params: DeploymentParams::default(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();
    let (status, body) = send(&app(&harness), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = parse(&body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "fleetpatch");
}

#[tokio::test]
async fn test_submit_is_accepted_then_listed() {
    let harness = Harness::new();
    let app = app(&harness);

    let (status, body) = send(&app, Method::POST, "/deployments", Some(submit_body(patch()))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let submitted: SubmitResponse = parse(&body);
    assert_eq!(submitted.status, "PENDING");

    harness.run_next().await;

    let uri = format!("/deployments/{}", submitted.deployment_id);
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let record: serde_json::Value = parse(&body);
    assert_eq!(record["status"], "COMPLETED");

    let (_, body) = send(&app, Method::GET, "/deployments", None).await;
    let list: DeploymentList = parse(&body);
    assert_eq!(list.total, 1);
    assert_eq!(list.deployments[0].patch_id, "CVE-2024-1234");

    let (status, body) = send(&app, Method::GET, &format!("{}/logs", uri), None).await;
    assert_eq!(status, StatusCode::OK);
    let logs: Vec<serde_json::Value> = parse(&body);
    assert!(!logs.is_empty());
}

#[tokio::test]
async fn test_rejected_submit_lists_reasons() {
    let harness = Harness::new();
    let mut untested = patch();
    untested.test_status = TestStatus::Failed;

    let (status, body) = send(&app(&harness), Method::POST, "/deployments", Some(submit_body(untested))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = parse(&body);
    assert_eq!(error.error, "validation_error");
    assert_eq!(error.reasons.len(), 1);
    assert!(error.reasons[0].starts_with("test_status"));
    assert!(harness.engine.list().is_empty());
}

#[tokio::test]
async fn test_unknown_deployment_is_404() {
    let harness = Harness::new();
    let uri = format!("/deployments/{}", uuid::Uuid::new_v4());

    let (status, body) = send(&app(&harness), Method::GET, &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = parse(&body);
    assert_eq!(error.error, "not_found");
}

#[tokio::test]
async fn test_rollback_status_codes() {
    let harness = Harness::new();
    let app = app(&harness);

    // No inverse commands recorded
    let without = harness
        .engine
        .submit(patch_without_rollback(), assets(1), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;
    let (status, body) = send(&app, Method::POST, &format!("/deployments/{}/rollback", without), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = parse(&body);
    assert_eq!(error.error, "missing_rollback_data");

    // Still queued
    let pending = harness
        .engine
        .submit(patch(), assets(2), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
    let (status, _) = send(&app, Method::POST, &format!("/deployments/{}/rollback", pending), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    harness.run_next().await;
    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/deployments/{}/rollback", pending),
        Some(serde_json::json!({ "asset_ids": ["asset-00"] })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: AcceptedResponse = parse(&body);
    assert!(accepted.accepted);
}

#[tokio::test]
async fn test_cancel_finished_deployment_is_409() {
    let harness = Harness::new();
    let id = harness
        .engine
        .submit(patch(), assets(1), Strategy::default(), DeploymentParams::default())
        .await
        .unwrap();
    harness.run_next().await;

    let (status, body) = send(&app(&harness), Method::POST, &format!("/deployments/{}/cancel", id), None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    let error: ErrorResponse = parse(&body);
    assert_eq!(error.error, "invalid_transition");
}
