//! Remote execution adapter
//!
//! The only part of the orchestrator that talks to assets. A [`Transport`]
//! opens a [`Connection`] to one asset; the [`executor::RemoteExecutor`]
//! layers retries, timeouts and execution logging on top.

pub mod executor;
pub mod local;
pub mod ssh;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::models::asset::Asset;

pub use executor::{ExecutorOptions, RemoteExecutor};

/// Output of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Failure to open a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectError {
    pub message: String,

    /// Whether retrying may help (refused, unreachable, handshake timeout)
    pub transient: bool,
}

impl ConnectError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// An open session to one asset.
///
/// Implementations must release the underlying session when dropped, so an
/// aborted or timed-out operation never leaks it.
#[async_trait]
pub trait Connection: Send {
    /// Run a single shell command
    async fn run(&mut self, command: &str) -> std::io::Result<CommandOutput>;

    /// Close the session gracefully
    async fn close(self: Box<Self>);
}

/// Opens connections to assets
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session to the asset
    async fn connect(&self, asset: &Asset) -> Result<Box<dyn Connection>, ConnectError>;

    /// Lightweight reachability probe that runs nothing on the asset
    async fn probe(&self, asset: &Asset, timeout: Duration) -> Result<(), String> {
        tcp_probe(asset, self.default_port(), timeout).await
    }

    /// Port used when the asset endpoint does not carry one
    fn default_port(&self) -> u16 {
        22
    }

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Probe an asset by opening and dropping a TCP connection
pub async fn tcp_probe(asset: &Asset, default_port: u16, timeout: Duration) -> Result<(), String> {
    let addr = format!("{}:{}", asset.host(), asset.port_or(default_port));
    match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(format!("{} unreachable: {}", addr, e)),
        Err(_) => Err(format!("{} did not answer within {:?}", addr, timeout)),
    }
}
