//! Webhook audit sink

use std::time::Duration;

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::audit::EventSink;
use crate::errors::OrchestratorError;
use crate::models::events::AuditEvent;

const QUEUE_CAPACITY: usize = 1024;

/// Posts every event as JSON to a notification endpoint.
///
/// Delivery happens on a background task in emission order; failures are
/// logged and never affect the deployment.
pub struct WebhookSink {
    tx: mpsc::Sender<AuditEvent>,
}

impl WebhookSink {
    /// Create the sink and spawn its delivery task
    pub fn spawn(url: &str) -> Result<Self, OrchestratorError> {
        let url = url::Url::parse(url)
            .map_err(|e| OrchestratorError::ConfigError(format!("Invalid webhook URL {}: {}", url, e)))?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(QUEUE_CAPACITY);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match client.post(url.clone()).json(&event).send().await {
                    Ok(response) if response.status().is_success() => {
                        debug!("Delivered audit event for {}", event.deployment_id);
                    }
                    Ok(response) => {
                        warn!("Audit webhook rejected event: {}", response.status());
                    }
                    Err(e) => {
                        error!("Audit webhook delivery failed: {}", e);
                    }
                }
            }
        });

        Ok(Self { tx })
    }
}

impl EventSink for WebhookSink {
    fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!("Dropping audit event, webhook queue unavailable: {}", e);
        }
    }
}
