//! Active/inactive pool pointer for blue/green rollouts

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::errors::OrchestratorError;
use crate::models::asset::Pool;

/// Routes traffic to one pool per group
#[async_trait]
pub trait TrafficSwitch: Send + Sync {
    /// Pool currently serving traffic
    async fn active(&self, group: &str) -> Result<Pool, OrchestratorError>;

    /// Atomically point traffic at `pool`
    async fn switch(&self, group: &str, pool: Pool) -> Result<(), OrchestratorError>;
}

/// Pointer kept in memory. Groups start on blue.
#[derive(Debug, Default)]
pub struct InMemorySwitch {
    active: RwLock<HashMap<String, Pool>>,
}

impl InMemorySwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a group's pointer without going through a rollout
    pub fn set(&self, group: &str, pool: Pool) {
        let mut active = self.active.write().unwrap_or_else(|e| e.into_inner());
        active.insert(group.to_string(), pool);
    }

    pub fn get(&self, group: &str) -> Pool {
        let active = self.active.read().unwrap_or_else(|e| e.into_inner());
        active.get(group).copied().unwrap_or(Pool::Blue)
    }
}

#[async_trait]
impl TrafficSwitch for InMemorySwitch {
    async fn active(&self, group: &str) -> Result<Pool, OrchestratorError> {
        Ok(self.get(group))
    }

    async fn switch(&self, group: &str, pool: Pool) -> Result<(), OrchestratorError> {
        info!(group, %pool, "Switching traffic");
        self.set(group, pool);
        Ok(())
    }
}
