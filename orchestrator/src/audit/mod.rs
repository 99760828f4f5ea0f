//! Audit and notification sinks

pub mod journal;
pub mod webhook;

use std::sync::Arc;

use tracing::info;

use crate::models::events::AuditEvent;

pub use journal::Journal;
pub use webhook::WebhookSink;

/// Receives every audit event. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes events as structured log lines
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: AuditEvent) {
        info!(
            target: "fleetpatch::audit",
            deployment_id = %event.deployment_id,
            phase = ?event.phase,
            asset_id = event.asset_id.as_deref().unwrap_or("-"),
            status = %event.status,
            "{}",
            event.message
        );
    }
}

/// Forwards each event to several sinks
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: AuditEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
