//! Monitoring collaborator polled during canary observation windows

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::asset::Asset;

/// Reports the current anomaly state of an asset
#[async_trait]
pub trait AnomalySource: Send + Sync {
    /// A description of the anomaly, or `None` when the asset looks normal
    async fn anomaly(&self, asset: &Asset) -> Option<String>;
}

/// Used when no monitoring system is wired in
#[derive(Debug, Default)]
pub struct NoAnomalies;

#[async_trait]
impl AnomalySource for NoAnomalies {
    async fn anomaly(&self, _asset: &Asset) -> Option<String> {
        None
    }
}

/// Anomalies raised by an external alerting hook, keyed by asset id
#[derive(Debug, Default)]
pub struct ReportedAnomalies {
    reports: RwLock<HashMap<String, String>>,
}

impl ReportedAnomalies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, asset_id: &str, description: impl Into<String>) {
        let mut reports = self.reports.write().unwrap_or_else(|e| e.into_inner());
        reports.insert(asset_id.to_string(), description.into());
    }

    pub fn clear(&self, asset_id: &str) {
        let mut reports = self.reports.write().unwrap_or_else(|e| e.into_inner());
        reports.remove(asset_id);
    }
}

#[async_trait]
impl AnomalySource for ReportedAnomalies {
    async fn anomaly(&self, asset: &Asset) -> Option<String> {
        let reports = self.reports.read().unwrap_or_else(|e| e.into_inner());
        reports.get(&asset.id).cloned()
    }
}
