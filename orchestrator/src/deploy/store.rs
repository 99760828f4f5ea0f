//! Deployment record store
//!
//! Records live in memory and, when a directory is configured, are written
//! to `<dir>/<id>.json` after every change. Records are never deleted.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;
use crate::models::execution::ExecutionLog;

/// Deployment record store
#[derive(Debug, Default)]
pub struct DeploymentStore {
    records: RwLock<HashMap<Uuid, Deployment>>,
    logs: RwLock<HashMap<Uuid, Arc<ExecutionLog>>>,
    dir: Option<Dir>,
}

impl DeploymentStore {
    /// In-memory only
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist records under `dir`, loading the ones already there
    pub async fn persistent(dir: Dir) -> Result<Self, OrchestratorError> {
        dir.create().await?;

        let mut records = HashMap::new();
        for path in dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match File::new(&path).read_json::<Deployment>().await {
                Ok(deployment) => {
                    records.insert(deployment.id, deployment);
                }
                Err(e) => warn!("Skipping unreadable deployment record {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} deployment records from {}", records.len(), dir.path().display());

        Ok(Self {
            records: RwLock::new(records),
            logs: RwLock::new(HashMap::new()),
            dir: Some(dir),
        })
    }

    /// Add a new record and create its execution log
    pub async fn insert(&self, deployment: Deployment) -> Arc<ExecutionLog> {
        let id = deployment.id;
        self.persist(&deployment).await;
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            records.insert(id, deployment);
        }
        self.log(id)
    }

    /// Snapshot of one record
    pub fn get(&self, id: Uuid) -> Result<Deployment, OrchestratorError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {}", id)))
    }

    pub fn contains(&self, id: Uuid) -> bool {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.contains_key(&id)
    }

    /// Every record, oldest first
    pub fn list(&self) -> Vec<Deployment> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Deployment> = records.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        all
    }

    /// Apply `change` to a record, persist it and return the new snapshot
    pub async fn update<F, T>(&self, id: Uuid, change: F) -> Result<(Deployment, T), OrchestratorError>
    where
        F: FnOnce(&mut Deployment) -> Result<T, OrchestratorError>,
    {
        let (snapshot, value) = {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let deployment = records
                .get_mut(&id)
                .ok_or_else(|| OrchestratorError::NotFound(format!("deployment {}", id)))?;
            let value = change(deployment)?;
            (deployment.clone(), value)
        };
        self.persist(&snapshot).await;
        Ok((snapshot, value))
    }

    /// Execution log of a deployment. Records loaded from disk start empty.
    pub fn log(&self, id: Uuid) -> Arc<ExecutionLog> {
        let mut logs = self.logs.write().unwrap_or_else(|e| e.into_inner());
        logs.entry(id).or_default().clone()
    }

    async fn persist(&self, deployment: &Deployment) {
        let Some(dir) = &self.dir else {
            return;
        };
        let file = dir.file(&format!("{}.json", deployment.id));
        let result = match serde_json::to_vec_pretty(deployment) {
            Ok(bytes) => file.write_atomic(&bytes).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            error!(deployment_id = %deployment.id, "Failed to persist deployment record: {}", e);
        }
    }
}
