//! Local shell transport
//!
//! Runs commands with `sh -c` on the orchestrator host. Useful for labs,
//! containers that mount the target filesystem, and smoke tests.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::models::asset::Asset;
use crate::remote::{CommandOutput, ConnectError, Connection, Transport};

/// Transport that executes on the local host
#[derive(Debug, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, asset: &Asset) -> Result<Box<dyn Connection>, ConnectError> {
        Ok(Box::new(LocalConnection {
            asset_id: asset.id.clone(),
        }))
    }

    async fn probe(&self, _asset: &Asset, _timeout: Duration) -> Result<(), String> {
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// A local "session"
pub struct LocalConnection {
    asset_id: String,
}

#[async_trait]
impl Connection for LocalConnection {
    async fn run(&mut self, command: &str) -> std::io::Result<CommandOutput> {
        let output = Command::new("sh")
            .args(["-c", command])
            .env("FLEETPATCH_ASSET_ID", &self.asset_id)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn close(self: Box<Self>) {}
}
