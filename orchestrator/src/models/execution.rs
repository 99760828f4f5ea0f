//! Remote execution results and the append-only execution log

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which side of the change an operation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Forward,
    Verify,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Forward => write!(f, "forward"),
            Phase::Verify => write!(f, "verify"),
            Phase::Rollback => write!(f, "rollback"),
        }
    }
}

/// Why an asset-level operation failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// A command ran and exited non-zero
    NonZeroExit { command: String, exit_code: i32 },

    /// The command sequence exceeded its timeout and was terminated
    Timeout { after_ms: u64 },

    /// No connection could be established after retries
    Connection { message: String, attempts: u32 },

    /// The command could not be started on an open connection
    Spawn { message: String },

    /// Commands succeeded but the asset failed its health checks
    Unhealthy { checks: Vec<String> },
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionFailure::NonZeroExit { command, exit_code } => {
                write!(f, "`{}` exited with {}", command, exit_code)
            }
            ExecutionFailure::Timeout { after_ms } => write!(f, "timed out after {}ms", after_ms),
            ExecutionFailure::Connection { message, attempts } => {
                write!(f, "connection failed after {} attempts: {}", attempts, message)
            }
            ExecutionFailure::Spawn { message } => write!(f, "failed to start command: {}", message),
            ExecutionFailure::Unhealthy { checks } => write!(f, "unhealthy: {}", checks.join(", ")),
        }
    }
}

/// Outcome of running an ordered command list on one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub asset_id: String,
    pub phase: Phase,

    /// Exit code of the last command run, if it finished
    pub exit_code: Option<i32>,

    /// Combined stdout of the commands run
    pub stdout: String,

    /// Combined stderr of the commands run
    pub stderr: String,

    /// Every command exited zero
    pub success: bool,

    /// Number of commands that were started
    pub commands_started: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<ExecutionFailure>,

    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Whether any command was started on the asset
    pub fn touched(&self) -> bool {
        self.commands_started > 0
    }

    pub fn failure_message(&self) -> Option<String> {
        self.failure.as_ref().map(|f| f.to_string())
    }
}

/// One command execution, written once and never mutated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub asset_id: String,
    pub phase: Phase,
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only log of every remote command run for a deployment
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: RwLock<Vec<LogEntry>>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.push(entry);
    }

    /// Snapshot of all entries, in append order
    pub fn entries(&self) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.clone()
    }

    /// Entries for one asset
    pub fn for_asset(&self, asset_id: &str) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .filter(|e| e.asset_id == asset_id)
            .cloned()
            .collect()
    }

    /// Entries for one phase
    pub fn for_phase(&self, phase: Phase) -> Vec<LogEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|e| e.phase == phase).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
