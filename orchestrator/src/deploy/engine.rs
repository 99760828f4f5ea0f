//! Deployment engine
//!
//! Owns every deployment record. `submit` validates and enqueues; a worker
//! later calls [`DeploymentEngine::run_job`] to drive the deployment through
//! its strategy and, on failure, the rollback engine. At most one task writes
//! a given deployment at a time.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::audit::EventSink;
use crate::deploy::cancel::CancelToken;
use crate::deploy::fsm::{DeploymentEvent, DeploymentStatus};
use crate::deploy::locks::{AssetLease, AssetLocks};
use crate::deploy::store::DeploymentStore;
use crate::errors::{OrchestratorError, ValidationFailure};
use crate::models::asset::Asset;
use crate::models::deployment::{Deployment, DeploymentParams};
use crate::models::events::{AuditEvent, EventPhase};
use crate::models::execution::LogEntry;
use crate::models::patch::Patch;
use crate::monitor::AnomalySource;
use crate::remote::RemoteExecutor;
use crate::rollback::{RollbackEngine, RollbackResult};
use crate::strategy::{self, RolloutContext, Strategy, StrategyResult, TrafficSwitch, Verdict};
use crate::validate::health::HealthValidator;
use crate::validate::pre::PreValidator;
use crate::workers::queue::{Job, JobSender};

/// Engine options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Default bound on concurrent per-asset operations
    pub max_parallel: usize,

    /// Default bound on each asset's command sequence
    pub command_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_parallel: 16,
            command_timeout: None,
        }
    }
}

/// Collaborators the engine drives
#[derive(Clone)]
pub struct EngineDeps {
    pub executor: Arc<RemoteExecutor>,
    pub health: Arc<HealthValidator>,
    pub pre: Arc<PreValidator>,
    pub monitor: Arc<dyn AnomalySource>,
    pub switch: Arc<dyn TrafficSwitch>,
    pub events: Arc<dyn EventSink>,
    pub store: Arc<DeploymentStore>,
}

/// Deployment engine
pub struct DeploymentEngine {
    deps: EngineDeps,
    options: EngineOptions,
    queue: JobSender,
    locks: AssetLocks,
    leases: Mutex<HashMap<Uuid, AssetLease>>,
    cancels: RwLock<HashMap<Uuid, CancelToken>>,
    owners: Arc<Mutex<HashSet<Uuid>>>,
}

/// Exclusive write ownership of one deployment, released on drop
struct Ownership {
    owners: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for Ownership {
    fn drop(&mut self) {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.remove(&self.id);
    }
}

impl DeploymentEngine {
    pub fn new(deps: EngineDeps, options: EngineOptions, queue: JobSender) -> Self {
        Self {
            deps,
            options,
            queue,
            locks: AssetLocks::new(),
            leases: Mutex::new(HashMap::new()),
            cancels: RwLock::new(HashMap::new()),
            owners: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &Arc<DeploymentStore> {
        &self.deps.store
    }

    // ================================ CONTROL SURFACE ================================ //

    /// Validate and enqueue a deployment, returning its id.
    ///
    /// Nothing is created and no asset is contacted beyond the reachability
    /// probe when validation fails.
    pub async fn submit(
        &self,
        patch: Patch,
        assets: Vec<Asset>,
        strategy: Strategy,
        params: DeploymentParams,
    ) -> Result<Uuid, OrchestratorError> {
        self.deps
            .pre
            .validate(&patch, &assets, &strategy, params.rollback_on_failure, Utc::now())
            .await?;

        let deployment = Deployment::new(patch, assets, strategy, params);
        let id = deployment.id;
        let lease = self.locks.acquire(deployment.patch.scope(), &deployment.targets, id)?;

        let summary = format!(
            "patch {} on {} assets with {}",
            deployment.patch.id,
            deployment.targets.len(),
            deployment.strategy
        );
        self.deps.store.insert(deployment).await;
        self.lock_leases().insert(id, lease);
        self.write_cancels().insert(id, CancelToken::new());
        self.emit(AuditEvent::new(id, EventPhase::Submit, "accepted", summary.clone()));
        info!(deployment_id = %id, "Deployment submitted: {}", summary);

        if let Err(e) = self.enqueue(Job::Deploy(id)) {
            self.finish_unstarted(id, format!("not started: {}", e)).await;
            return Err(e);
        }
        Ok(id)
    }

    /// Snapshot of a deployment
    pub fn get_status(&self, id: Uuid) -> Result<Deployment, OrchestratorError> {
        self.deps.store.get(id)
    }

    /// Every deployment, oldest first
    pub fn list(&self) -> Vec<Deployment> {
        self.deps.store.list()
    }

    /// Execution log entries of a deployment
    pub fn logs(&self, id: Uuid) -> Result<Vec<LogEntry>, OrchestratorError> {
        if !self.deps.store.contains(id) {
            return Err(OrchestratorError::NotFound(format!("deployment {}", id)));
        }
        Ok(self.deps.store.log(id).entries())
    }

    /// Request cooperative cancellation, observed at the next batch boundary
    pub fn cancel(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let deployment = self.deps.store.get(id)?;
        if deployment.status().is_terminal() {
            return Err(OrchestratorError::InvalidTransition(format!(
                "deployment {} is already {}",
                id,
                deployment.status()
            )));
        }

        let token = self.read_cancels().get(&id).cloned();
        match token {
            Some(token) => token.cancel(),
            None => {
                return Err(OrchestratorError::Conflict(format!(
                    "deployment {} is not running in this process",
                    id
                )))
            }
        }
        self.emit(AuditEvent::new(id, EventPhase::Cancel, "requested", "cancellation requested"));
        info!(deployment_id = %id, "Cancellation requested");
        Ok(())
    }

    /// Roll a terminal deployment back and wait for the result.
    ///
    /// `asset_ids` defaults to the deployment's rollback targets. With no
    /// rollback commands this fails with `MissingRollbackData` and the
    /// deployment is left unchanged.
    pub async fn rollback(
        &self,
        id: Uuid,
        asset_ids: Option<Vec<String>>,
    ) -> Result<RollbackResult, OrchestratorError> {
        let _owner = self.claim(id)?;
        let deployment = self.deps.store.get(id)?;
        let targets = self.rollback_request(&deployment, asset_ids)?;
        let _lease = self.locks.acquire(deployment.patch.scope(), &targets, id)?;

        let result = self.execute_rollback(&deployment, &targets).await?;
        let event = match result.ensure_verified() {
            Ok(()) => DeploymentEvent::RollbackSucceeded(result.summary()),
            Err(e) => DeploymentEvent::RollbackFailed(e.to_string()),
        };

        let recorded = result.clone();
        let (snapshot, ()) = self
            .deps
            .store
            .update(id, move |d| {
                d.record_rollback(recorded);
                d.fsm.process(event)?;
                d.completed_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        self.emit_transition(&snapshot);
        Ok(result)
    }

    /// Validate a rollback request and enqueue it for the worker pool
    pub fn request_rollback(&self, id: Uuid, asset_ids: Option<Vec<String>>) -> Result<(), OrchestratorError> {
        if self.is_owned(id) {
            return Err(OrchestratorError::Conflict(format!("deployment {} is busy", id)));
        }
        let deployment = self.deps.store.get(id)?;
        let targets = self.rollback_request(&deployment, asset_ids)?;
        self.enqueue(Job::Rollback {
            deployment_id: id,
            asset_ids: Some(targets),
        })?;
        self.emit(AuditEvent::new(id, EventPhase::Rollback, "requested", "rollback queued"));
        Ok(())
    }

    /// Mark deployments left unfinished by a previous process as failed
    pub async fn recover_interrupted(&self) -> usize {
        let mut recovered = 0;
        for deployment in self.deps.store.list() {
            if deployment.status().is_terminal() {
                continue;
            }
            let reason = "interrupted: the orchestrator stopped while the deployment was in flight";
            match self.finish(deployment.id, DeploymentEvent::Fail(reason.to_string())).await {
                Ok(_) => recovered += 1,
                Err(e) => error!(deployment_id = %deployment.id, "Failed to recover deployment: {}", e),
            }
        }
        if recovered > 0 {
            warn!("Marked {} interrupted deployments as failed", recovered);
        }
        recovered
    }

    // ================================== WORKER SIDE ================================== //

    /// Execute one queued job
    pub async fn run_job(&self, job: Job) {
        let id = job.deployment_id();
        let result = match job {
            Job::Deploy(id) => self.run_deployment(id).await,
            Job::Rollback {
                deployment_id,
                asset_ids,
            } => self.rollback(deployment_id, asset_ids).await.map(|_| ()),
        };
        if let Err(e) = result {
            error!(deployment_id = %id, "Job failed: {}", e);
        }
    }

    async fn run_deployment(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let _owner = self.claim(id)?;
        let cancel = self.read_cancels().get(&id).cloned().unwrap_or_default();

        if cancel.is_cancelled() {
            self.finish_unstarted(id, "cancelled before start".to_string()).await;
            return Ok(());
        }

        let (deployment, ()) = self
            .deps
            .store
            .update(id, |d| {
                d.fsm.process(DeploymentEvent::Start)?;
                d.started_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        self.emit_transition(&deployment);

        let log = self.deps.store.log(id);
        let ctx = RolloutContext {
            deployment_id: id,
            patch: Arc::new(deployment.patch.clone()),
            executor: Arc::clone(&self.deps.executor),
            health: Arc::clone(&self.deps.health),
            monitor: Arc::clone(&self.deps.monitor),
            switch: Arc::clone(&self.deps.switch),
            events: Arc::clone(&self.deps.events),
            log,
            cancel: cancel.clone(),
            max_parallel: deployment.params.max_parallel.unwrap_or(self.options.max_parallel),
            command_timeout: deployment.params.command_timeout().or(self.options.command_timeout),
        };
        let assets: Vec<Arc<Asset>> = deployment.assets.iter().cloned().map(Arc::new).collect();

        info!(deployment_id = %id, strategy = %deployment.strategy, "Running deployment");
        let result = strategy::execute(&deployment.strategy, &assets, &ctx).await;

        let cancel_requested = cancel.is_cancelled();
        let (deployment, ()) = self
            .deps
            .store
            .update(id, |d| {
                d.record_strategy(&result);
                d.cancel_requested = cancel_requested;
                Ok(())
            })
            .await?;

        let event = self.conclude(&deployment, &result).await;
        self.finish(id, event).await?;
        Ok(())
    }

    /// Decide the terminal event for a finished strategy run, rolling back
    /// when the deployment asks for it
    async fn conclude(&self, deployment: &Deployment, result: &StrategyResult) -> DeploymentEvent {
        let reason = match &result.verdict {
            Verdict::Completed => return DeploymentEvent::Complete,
            Verdict::Cancelled { reason } | Verdict::Discarded { reason } => {
                return DeploymentEvent::Fail(reason.clone())
            }
            Verdict::Reverted { reason } => return DeploymentEvent::RollbackSucceeded(reason.clone()),
            Verdict::RevertFailed { reason } => return DeploymentEvent::RollbackFailed(reason.clone()),
            Verdict::Failed { reason } => reason.clone(),
        };

        if !deployment.params.rollback_on_failure {
            return DeploymentEvent::Fail(reason);
        }
        let targets = deployment.rollback_targets();
        if targets.is_empty() {
            return DeploymentEvent::Fail(format!("{}; no asset was patched, nothing to roll back", reason));
        }

        info!(deployment_id = %deployment.id, assets = targets.len(), "Rolling back after failure");
        match self.execute_rollback(deployment, &targets).await {
            Ok(rollback) => {
                let event = match rollback.ensure_verified() {
                    Ok(()) => DeploymentEvent::RollbackSucceeded(format!("{}; {}", reason, rollback.summary())),
                    Err(e) => DeploymentEvent::RollbackFailed(format!("{}; {}", reason, e)),
                };
                let recorded = rollback.clone();
                if let Err(e) = self
                    .deps
                    .store
                    .update(deployment.id, move |d| {
                        d.record_rollback(recorded);
                        Ok(())
                    })
                    .await
                {
                    error!(deployment_id = %deployment.id, "Failed to record rollback: {}", e);
                }
                event
            }
            Err(e) => DeploymentEvent::Fail(format!("{}; rollback not possible: {}", reason, e)),
        }
    }

    async fn execute_rollback(
        &self,
        deployment: &Deployment,
        targets: &[String],
    ) -> Result<RollbackResult, OrchestratorError> {
        let assets: Vec<Arc<Asset>> = targets
            .iter()
            .filter_map(|id| deployment.assets.iter().find(|a| &a.id == id))
            .cloned()
            .map(Arc::new)
            .collect();

        let engine = RollbackEngine::new(
            Arc::clone(&self.deps.executor),
            Arc::clone(&self.deps.health),
            Arc::clone(&self.deps.events),
            deployment.params.max_parallel.unwrap_or(self.options.max_parallel),
            deployment.params.command_timeout().or(self.options.command_timeout),
        );
        let log = self.deps.store.log(deployment.id);
        engine
            .execute_rollback(deployment.id, &Arc::new(deployment.patch.clone()), &assets, &log)
            .await
    }

    // ==================================== HELPERS ==================================== //

    /// Rollback targets after checking the request against the record
    fn rollback_request(
        &self,
        deployment: &Deployment,
        asset_ids: Option<Vec<String>>,
    ) -> Result<Vec<String>, OrchestratorError> {
        if !deployment.fsm.can_rollback() {
            return Err(OrchestratorError::InvalidTransition(format!(
                "deployment {} is {}; rollback needs a terminal deployment",
                deployment.id,
                deployment.status()
            )));
        }
        if !deployment.patch.has_rollback_data() {
            self.emit(AuditEvent::new(
                deployment.id,
                EventPhase::Rollback,
                "missing_data",
                format!("patch {} has no rollback commands", deployment.patch.id),
            ));
            return Err(OrchestratorError::MissingRollbackData(deployment.patch.id.clone()));
        }

        let targets = asset_ids.unwrap_or_else(|| deployment.rollback_targets());
        let unknown: Vec<ValidationFailure> = targets
            .iter()
            .filter(|id| !deployment.targets.contains(id))
            .map(|id| ValidationFailure::for_asset("rollback", id, "asset is not a target of this deployment"))
            .collect();
        if !unknown.is_empty() {
            return Err(OrchestratorError::Validation(unknown));
        }
        if targets.is_empty() {
            return Err(OrchestratorError::Validation(vec![ValidationFailure::new(
                "rollback",
                "no assets to roll back",
            )]));
        }
        Ok(targets)
    }

    fn enqueue(&self, job: Job) -> Result<(), OrchestratorError> {
        self.queue.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => OrchestratorError::ServerError("work queue is full".to_string()),
            TrySendError::Closed(_) => OrchestratorError::ShutdownError("work queue is closed".to_string()),
        })
    }

    /// Move a deployment to a terminal state and release its resources
    async fn finish(&self, id: Uuid, event: DeploymentEvent) -> Result<Deployment, OrchestratorError> {
        let (deployment, ()) = self
            .deps
            .store
            .update(id, |d| {
                d.fsm.process(event)?;
                d.completed_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        self.release(id);
        self.emit_transition(&deployment);
        Ok(deployment)
    }

    async fn finish_unstarted(&self, id: Uuid, reason: String) {
        let cancelled = self.read_cancels().get(&id).is_some_and(|t| t.is_cancelled());
        let result = self
            .deps
            .store
            .update(id, |d| {
                d.cancel_requested = cancelled;
                Ok(())
            })
            .await;
        if let Err(e) = result {
            error!(deployment_id = %id, "Failed to update deployment: {}", e);
        }
        if let Err(e) = self.finish(id, DeploymentEvent::Fail(reason)).await {
            error!(deployment_id = %id, "Failed to finish deployment: {}", e);
        }
    }

    fn release(&self, id: Uuid) {
        self.lock_leases().remove(&id);
        self.write_cancels().remove(&id);
    }

    fn claim(&self, id: Uuid) -> Result<Ownership, OrchestratorError> {
        let mut owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        if !owners.insert(id) {
            return Err(OrchestratorError::Conflict(format!("deployment {} is busy", id)));
        }
        Ok(Ownership {
            owners: Arc::clone(&self.owners),
            id,
        })
    }

    fn is_owned(&self, id: Uuid) -> bool {
        let owners = self.owners.lock().unwrap_or_else(|e| e.into_inner());
        owners.contains(&id)
    }

    fn emit(&self, event: AuditEvent) {
        self.deps.events.emit(event);
    }

    fn emit_transition(&self, deployment: &Deployment) {
        let status = deployment.status();
        let message = deployment.reason().unwrap_or(status.as_str()).to_string();
        if status == DeploymentStatus::Completed || !status.is_terminal() {
            info!(deployment_id = %deployment.id, %status, "Deployment transition");
        } else {
            warn!(deployment_id = %deployment.id, %status, "Deployment transition: {}", message);
        }
        self.emit(AuditEvent::new(deployment.id, EventPhase::Transition, status.as_str(), message));
    }

    fn lock_leases(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, AssetLease>> {
        self.leases.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read_cancels(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, CancelToken>> {
        self.cancels.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_cancels(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, CancelToken>> {
        self.cancels.write().unwrap_or_else(|e| e.into_inner())
    }
}
