//! OpenSSH transport
//!
//! Each connection owns a ControlMaster process; commands are multiplexed
//! over its control socket. Every spawned process is `kill_on_drop`, so
//! dropping a connection (or a timed-out command) terminates it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::models::asset::Asset;
use crate::remote::{CommandOutput, ConnectError, Connection, Transport};

/// ssh exits with this status when the connection itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// SSH transport options
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Login user when the asset has no `user` tag
    pub user: String,

    /// Port when the asset endpoint has none
    pub port: u16,

    /// Identity file when the asset has no credential reference
    pub identity_file: Option<PathBuf>,

    /// Seconds ssh may spend on the TCP connect and handshake
    pub connect_timeout_secs: u64,

    /// Verify host keys against known_hosts
    pub strict_host_key_checking: bool,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            strict_host_key_checking: true,
        }
    }
}

/// Transport over the system OpenSSH client
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn target(&self, asset: &Asset) -> SshTarget {
        SshTarget {
            destination: format!(
                "{}@{}",
                asset.user().unwrap_or(&self.options.user),
                asset.host()
            ),
            port: asset.port_or(self.options.port),
            identity: asset
                .credential_ref
                .as_ref()
                .map(PathBuf::from)
                .or_else(|| self.options.identity_file.clone()),
        }
    }

    fn base_args(&self, target: &SshTarget) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.options.strict_host_key_checking { "yes" } else { "accept-new" }
            ),
        ];
        if let Some(identity) = &target.identity {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }
}

#[derive(Debug, Clone)]
struct SshTarget {
    destination: String,
    port: u16,
    identity: Option<PathBuf>,
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, asset: &Asset) -> Result<Box<dyn Connection>, ConnectError> {
        let target = self.target(asset);
        let socket = std::env::temp_dir().join(format!("fleetpatch-{}.sock", uuid::Uuid::new_v4()));

        debug!(asset_id = %asset.id, "Opening ssh control master to {}", target.destination);

        let mut master = Command::new("ssh")
            .args(self.base_args(&target))
            .args(["-M", "-N", "-o", "ControlPersist=no", "-S"])
            .arg(&socket)
            .arg(&target.destination)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ConnectError::fatal(format!("failed to spawn ssh: {}", e)))?;

        // Wait until the control socket answers or the master gives up
        loop {
            if let Some(status) = master
                .try_wait()
                .map_err(|e| ConnectError::fatal(e.to_string()))?
            {
                let stderr = match master.stderr.take() {
                    Some(mut pipe) => {
                        let mut buf = String::new();
                        let _ = tokio::io::AsyncReadExt::read_to_string(&mut pipe, &mut buf).await;
                        buf
                    }
                    None => String::new(),
                };
                let message = format!("ssh master exited with {}: {}", status, stderr.trim());
                return Err(if status.code() == Some(SSH_CONNECTION_FAILURE) {
                    ConnectError::transient(message)
                } else {
                    ConnectError::fatal(message)
                });
            }

            let check = Command::new("ssh")
                .args(["-S"])
                .arg(&socket)
                .args(["-O", "check"])
                .arg(&target.destination)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await;
            if matches!(check, Ok(status) if status.success()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        Ok(Box::new(SshConnection {
            args: self.base_args(&target),
            destination: target.destination,
            socket,
            master: Some(master),
        }))
    }

    fn default_port(&self) -> u16 {
        self.options.port
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// A multiplexed ssh session
pub struct SshConnection {
    args: Vec<String>,
    destination: String,
    socket: PathBuf,
    master: Option<Child>,
}

#[async_trait]
impl Connection for SshConnection {
    async fn run(&mut self, command: &str) -> std::io::Result<CommandOutput> {
        let output = Command::new("ssh")
            .args(&self.args)
            .arg("-S")
            .arg(&self.socket)
            .arg(&self.destination)
            .arg("--")
            .arg(command)
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

    async fn close(mut self: Box<Self>) {
        let exit = Command::new("ssh")
            .arg("-S")
            .arg(&self.socket)
            .args(["-O", "exit"])
            .arg(&self.destination)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        if let Err(e) = exit {
            warn!("Failed to stop ssh control master for {}: {}", self.destination, e);
        }
        if let Some(mut master) = self.master.take() {
            let _ = master.kill().await;
        }
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if let Some(master) = self.master.as_mut() {
            let _ = master.start_kill();
        }
        let _ = std::fs::remove_file(&self.socket);
    }
}
