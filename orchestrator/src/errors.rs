//! Error types for the orchestrator

use std::fmt;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single failed readiness check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    /// Check that failed (e.g. "test_status", "connectivity")
    pub check: String,

    /// Asset the failure applies to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,

    /// Human readable reason
    pub message: String,
}

impl ValidationFailure {
    pub fn new(check: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            asset_id: None,
            message: message.into(),
        }
    }

    pub fn for_asset(check: &str, asset_id: &str, message: impl Into<String>) -> Self {
        Self {
            check: check.to_string(),
            asset_id: Some(asset_id.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.asset_id {
            Some(asset_id) => write!(f, "{} [{}]: {}", self.check, asset_id, self.message),
            None => write!(f, "{}: {}", self.check, self.message),
        }
    }
}

fn join_failures(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation error: {}", join_failures(.0))]
    Validation(Vec<ValidationFailure>),

    #[error("Connection error to {asset_id}: {message}")]
    Connection { asset_id: String, message: String },

    #[error("Execution error on {asset_id}: {message}")]
    Execution { asset_id: String, message: String },

    #[error("Timeout on {asset_id} after {after:?}")]
    Timeout { asset_id: String, after: Duration },

    #[error("Missing rollback data: patch {0} has no rollback commands")]
    MissingRollbackData(String),

    #[error("Rollback verification failed for {}", .0.join(", "))]
    RollbackVerification(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Status code used by the control surface
    pub fn http_status(&self) -> StatusCode {
        match self {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidTransition(_) | OrchestratorError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            OrchestratorError::MissingRollbackData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestratorError::JsonError(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::Connection { .. } => "connection_error",
            OrchestratorError::Execution { .. } => "execution_error",
            OrchestratorError::Timeout { .. } => "timeout_error",
            OrchestratorError::MissingRollbackData(_) => "missing_rollback_data",
            OrchestratorError::RollbackVerification(_) => "rollback_verification_error",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::InvalidTransition(_) => "invalid_transition",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::IoError(_) => "io_error",
            OrchestratorError::JsonError(_) => "json_error",
            OrchestratorError::HttpError(_) => "http_error",
            OrchestratorError::ConfigError(_) => "config_error",
            OrchestratorError::ServerError(_) => "server_error",
            OrchestratorError::ShutdownError(_) => "shutdown_error",
            OrchestratorError::Internal(_) => "internal_error",
        }
    }

    /// Individual reasons, for error bodies
    pub fn reasons(&self) -> Vec<String> {
        match self {
            OrchestratorError::Validation(failures) => {
                failures.iter().map(|f| f.to_string()).collect()
            }
            OrchestratorError::RollbackVerification(assets) => assets.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
