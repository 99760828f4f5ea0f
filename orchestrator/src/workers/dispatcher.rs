//! Deployment worker pool
//!
//! Each worker takes jobs off the shared queue and runs them to completion.
//! A job in progress is finished before the worker observes shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info};

use crate::deploy::engine::DeploymentEngine;
use crate::workers::queue::JobReceiver;

/// Worker pool options
#[derive(Debug, Clone)]
pub struct Options {
    /// Number of concurrent deployments
    pub workers: usize,

    /// Capacity of the job queue
    pub queue_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
        }
    }
}

/// Run one worker
pub async fn run(
    worker_id: usize,
    engine: Arc<DeploymentEngine>,
    jobs: JobReceiver,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!(worker_id, "Deployment worker starting...");

    loop {
        let job = tokio::select! {
            _ = &mut shutdown_signal => {
                info!(worker_id, "Deployment worker shutting down...");
                return;
            }
            job = jobs.recv() => job,
        };

        match job {
            Some(job) => {
                debug!(worker_id, deployment_id = %job.deployment_id(), "Picked up {:?}", job);
                engine.run_job(job).await;
            }
            None => {
                info!(worker_id, "Job queue closed, deployment worker exiting...");
                return;
            }
        }
    }
}
