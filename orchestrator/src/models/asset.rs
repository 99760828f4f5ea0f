//! Asset models

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Tag naming the blue/green pool an asset belongs to
pub const POOL_TAG: &str = "pool";

/// Tag overriding the remote login user
pub const USER_TAG: &str = "user";

/// Business criticality of an asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A managed infrastructure target, as delivered by the asset inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Unique asset ID
    pub id: String,

    /// Hostname or `host:port` of the remote management endpoint
    pub endpoint: String,

    /// Reference to the credential used to log in (an identity file path for ssh)
    #[serde(default)]
    pub credential_ref: Option<String>,

    /// Criticality tag
    #[serde(default)]
    pub criticality: Criticality,

    /// Service whose health is checked after patching and rollback
    #[serde(default)]
    pub service_name: Option<String>,

    /// Version recorded before the deployment, used for rollback verification
    #[serde(default)]
    pub previous_version: Option<String>,

    /// Free-form tags
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Asset {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            credential_ref: None,
            criticality: Criticality::default(),
            service_name: None,
            previous_version: None,
            tags: HashMap::new(),
        }
    }

    /// Add a tag
    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Host part of the endpoint
    pub fn host(&self) -> &str {
        match self.endpoint.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => host,
            _ => &self.endpoint,
        }
    }

    /// Port part of the endpoint, or `default` when absent
    pub fn port_or(&self, default: u16) -> u16 {
        self.endpoint
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(default)
    }

    /// Blue/green pool, if tagged
    pub fn pool(&self) -> Option<Pool> {
        self.tags.get(POOL_TAG).and_then(|p| p.parse().ok())
    }

    /// Login user override, if tagged
    pub fn user(&self) -> Option<&str> {
        self.tags.get(USER_TAG).map(String::as_str)
    }
}

/// Blue/green pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Blue,
    Green,
}

impl Pool {
    /// The other pool
    pub fn other(self) -> Pool {
        match self {
            Pool::Blue => Pool::Green,
            Pool::Green => Pool::Blue,
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pool::Blue => write!(f, "blue"),
            Pool::Green => write!(f, "green"),
        }
    }
}

impl std::str::FromStr for Pool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blue" => Ok(Pool::Blue),
            "green" => Ok(Pool::Green),
            _ => Err(format!("Invalid pool: {}", s)),
        }
    }
}
