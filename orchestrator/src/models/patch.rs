//! Patch models

use serde::{Deserialize, Serialize};

use crate::utils::sha256_hash;

/// Result of the patch's pre-release test run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

/// Approval state of a patch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

/// A vetted remediation: forward commands plus their recorded inverse
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Unique patch ID, also the locking scope for in-flight assets
    pub id: String,

    /// Commands applied in order to install the patch
    pub forward_commands: Vec<String>,

    /// Commands applied in order to revert the patch. May be empty.
    #[serde(default)]
    pub rollback_commands: Vec<String>,

    /// Pre-release test outcome
    #[serde(default)]
    pub test_status: TestStatus,

    /// Approval outcome
    #[serde(default)]
    pub approval: ApprovalStatus,

    /// Content digest recorded when the patch was approved
    #[serde(default)]
    pub approved_digest: Option<String>,

    /// Service affected by the patch
    #[serde(default)]
    pub service_name: Option<String>,

    /// Version expected after a rollback, when the asset does not record one
    #[serde(default)]
    pub previous_version: Option<String>,

    /// Command printing the installed version on an asset
    #[serde(default)]
    pub version_command: Option<String>,
}

impl Patch {
    pub fn new(id: impl Into<String>, forward_commands: Vec<String>, rollback_commands: Vec<String>) -> Self {
        Self {
            id: id.into(),
            forward_commands,
            rollback_commands,
            test_status: TestStatus::Pending,
            approval: ApprovalStatus::Pending,
            approved_digest: None,
            service_name: None,
            previous_version: None,
            version_command: None,
        }
    }

    /// Digest over the command content of the patch. Each list and each
    /// command is length-prefixed so no command text can forge a boundary.
    pub fn digest(&self) -> String {
        let mut content = Vec::new();
        for commands in [&self.forward_commands, &self.rollback_commands] {
            content.extend_from_slice(&(commands.len() as u64).to_le_bytes());
            for command in commands {
                content.extend_from_slice(&(command.len() as u64).to_le_bytes());
                content.extend_from_slice(command.as_bytes());
            }
        }
        sha256_hash(&content)
    }

    /// Mark the patch as tested and approved, freezing its digest
    pub fn approve(mut self) -> Self {
        self.test_status = TestStatus::Passed;
        self.approval = ApprovalStatus::Approved;
        self.approved_digest = Some(self.digest());
        self
    }

    /// Whether inverse commands were recorded
    pub fn has_rollback_data(&self) -> bool {
        self.rollback_commands.iter().any(|c| !c.trim().is_empty())
    }

    /// Whether the content still matches the approved digest
    pub fn is_intact(&self) -> bool {
        match &self.approved_digest {
            Some(digest) => *digest == self.digest(),
            None => false,
        }
    }

    /// Scope used for in-flight asset locking
    pub fn scope(&self) -> &str {
        &self.id
    }
}
