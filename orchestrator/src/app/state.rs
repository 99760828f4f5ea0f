//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::audit::{EventSink, FanoutSink, Journal, TracingSink, WebhookSink};
use crate::deploy::engine::{DeploymentEngine, EngineDeps};
use crate::deploy::store::DeploymentStore;
use crate::errors::OrchestratorError;
use crate::monitor::NoAnomalies;
use crate::remote::local::LocalTransport;
use crate::remote::ssh::SshTransport;
use crate::remote::{RemoteExecutor, Transport};
use crate::storage::settings::TransportKind;
use crate::strategy::switch::InMemorySwitch;
use crate::validate::health::HealthValidator;
use crate::validate::pre::PreValidator;
use crate::workers::queue::{queue, JobReceiver};

/// Main application state
pub struct AppState {
    /// Deployment engine
    pub engine: Arc<DeploymentEngine>,

    /// In-memory audit journal backing the events endpoint
    pub journal: Arc<Journal>,

    /// Receiving side of the job queue, shared by the workers
    pub jobs: JobReceiver,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("Initializing application state...");

        options.storage.layout.setup().await?;

        // Remote execution
        let transport: Arc<dyn Transport> = match options.remote.transport {
            TransportKind::Ssh => Arc::new(SshTransport::new(options.remote.ssh.clone())),
            TransportKind::Local => Arc::new(LocalTransport),
        };
        let executor = Arc::new(RemoteExecutor::new(transport, options.remote.executor.clone()));
        info!("Using {} transport", executor.transport_name());

        // Validators
        let health = Arc::new(HealthValidator::new(executor.clone(), options.health.clone())?);
        let pre = Arc::new(PreValidator::new(
            executor.clone(),
            health.clone(),
            options.maintenance_windows.clone(),
        ));

        // Audit sinks
        let journal = Arc::new(Journal::new());
        let mut sinks = FanoutSink::new().with(Arc::new(TracingSink));
        if options.audit.journal {
            sinks = sinks.with(journal.clone());
        }
        if let Some(url) = &options.audit.webhook_url {
            sinks = sinks.with(Arc::new(WebhookSink::spawn(url)?));
        }
        let events: Arc<dyn EventSink> = Arc::new(sinks);

        // Deployment records
        let store = if options.storage.persist_deployments {
            Arc::new(DeploymentStore::persistent(options.storage.layout.deployment_dir()).await?)
        } else {
            Arc::new(DeploymentStore::new())
        };

        let (sender, jobs) = queue(options.workers.queue_capacity);
        let engine = Arc::new(DeploymentEngine::new(
            EngineDeps {
                executor,
                health,
                pre,
                monitor: Arc::new(NoAnomalies),
                switch: Arc::new(InMemorySwitch::new()),
                events,
                store,
            },
            options.engine.clone(),
            sender,
        ));

        let recovered = engine.recover_interrupted().await;
        if recovered > 0 {
            warn!("Marked {} interrupted deployments as FAILED", recovered);
        }

        Ok(Self {
            engine,
            journal,
            jobs,
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("Shutting down application state...");
        let unfinished = self
            .engine
            .list()
            .iter()
            .filter(|d| !d.status().is_terminal())
            .count();
        if unfinished > 0 {
            warn!(
                "{} deployments did not finish and will be marked FAILED on next start",
                unfinished
            );
        }
        Ok(())
    }
}
