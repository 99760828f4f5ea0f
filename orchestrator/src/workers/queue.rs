//! Work queue between the engine and the worker pool

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// A unit of work for the pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Drive a submitted deployment to a terminal state
    Deploy(Uuid),

    /// Roll back a terminal deployment
    Rollback {
        deployment_id: Uuid,
        asset_ids: Option<Vec<String>>,
    },
}

impl Job {
    pub fn deployment_id(&self) -> Uuid {
        match self {
            Job::Deploy(id) => *id,
            Job::Rollback { deployment_id, .. } => *deployment_id,
        }
    }
}

pub type JobSender = mpsc::Sender<Job>;

/// Receiving side, shared by every worker
#[derive(Debug, Clone)]
pub struct JobReceiver {
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl JobReceiver {
    /// Next job, `None` once every sender is gone
    pub async fn recv(&self) -> Option<Job> {
        self.rx.lock().await.recv().await
    }
}

/// Create a bounded queue
pub fn queue(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        tx,
        JobReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}
