//! Server state

use std::sync::Arc;

use crate::audit::Journal;
use crate::deploy::engine::DeploymentEngine;

/// Server state shared across handlers
pub struct ServerState {
    pub engine: Arc<DeploymentEngine>,
    pub journal: Arc<Journal>,
}

impl ServerState {
    pub fn new(engine: Arc<DeploymentEngine>, journal: Arc<Journal>) -> Self {
        Self { engine, journal }
    }
}
