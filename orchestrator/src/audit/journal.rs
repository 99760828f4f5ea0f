//! In-memory audit journal

use std::sync::RwLock;

use uuid::Uuid;

use crate::audit::EventSink;
use crate::models::events::{AuditEvent, EventPhase};

/// Append-only record of every audit event, queryable per deployment
#[derive(Debug, Default)]
pub struct Journal {
    events: RwLock<Vec<AuditEvent>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one deployment, in emission order
    pub fn for_deployment(&self, deployment_id: Uuid) -> Vec<AuditEvent> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events
            .iter()
            .filter(|e| e.deployment_id == deployment_id)
            .cloned()
            .collect()
    }

    /// Events of one deployment and phase
    pub fn for_phase(&self, deployment_id: Uuid, phase: EventPhase) -> Vec<AuditEvent> {
        self.for_deployment(deployment_id)
            .into_iter()
            .filter(|e| e.phase == phase)
            .collect()
    }

    pub fn len(&self) -> usize {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for Journal {
    fn emit(&self, event: AuditEvent) {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        events.push(event);
    }
}
