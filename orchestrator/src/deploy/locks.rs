//! Asset in-flight locks
//!
//! An asset may be the target of only one in-flight deployment per patch
//! scope. Locks are held through a [`AssetLease`] and released when it drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;
use uuid::Uuid;

use crate::errors::OrchestratorError;

type LockKey = (String, String);

/// Table of held asset locks
#[derive(Debug, Default, Clone)]
pub struct AssetLocks {
    held: Arc<Mutex<HashMap<LockKey, Uuid>>>,
}

impl AssetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every asset for `owner`, or none of them.
    ///
    /// Fails with `Conflict` naming the assets held by other deployments.
    pub fn acquire(&self, scope: &str, asset_ids: &[String], owner: Uuid) -> Result<AssetLease, OrchestratorError> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());

        let conflicts: Vec<String> = asset_ids
            .iter()
            .filter_map(|asset_id| {
                held.get(&(scope.to_string(), asset_id.clone()))
                    .filter(|holder| **holder != owner)
                    .map(|holder| format!("{} (deployment {})", asset_id, holder))
            })
            .collect();
        if !conflicts.is_empty() {
            return Err(OrchestratorError::Conflict(format!(
                "assets already in flight for patch {}: {}",
                scope,
                conflicts.join(", ")
            )));
        }

        let mut keys = Vec::with_capacity(asset_ids.len());
        for asset_id in asset_ids {
            let key = (scope.to_string(), asset_id.clone());
            if held.insert(key.clone(), owner).is_none() {
                keys.push(key);
            }
        }
        debug!(%owner, scope, assets = keys.len(), "Asset locks acquired");

        Ok(AssetLease {
            locks: self.clone(),
            owner,
            keys,
        })
    }

    /// Whether the asset is locked under `scope`
    pub fn is_locked(&self, scope: &str, asset_id: &str) -> bool {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.contains_key(&(scope.to_string(), asset_id.to_string()))
    }

    fn release(&self, owner: Uuid, keys: &[LockKey]) {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if held.get(key) == Some(&owner) {
                held.remove(key);
            }
        }
    }
}

/// Locks held by one deployment, released on drop
#[derive(Debug)]
pub struct AssetLease {
    locks: AssetLocks,
    owner: Uuid,
    keys: Vec<LockKey>,
}

impl AssetLease {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Drop for AssetLease {
    fn drop(&mut self) {
        self.locks.release(self.owner, &self.keys);
    }
}
