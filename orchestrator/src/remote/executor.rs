//! Retrying, timeout-bounded command execution on assets

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::models::asset::Asset;
use crate::models::execution::{ExecutionFailure, ExecutionLog, ExecutionResult, LogEntry, Phase};
use crate::remote::{CommandOutput, ConnectError, Connection, Transport};
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Executor options
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Default bound on a whole command sequence
    pub command_timeout: Duration,

    /// Bound on a single connection attempt
    pub connect_timeout: Duration,

    /// Extra attempts after a transient connection failure
    pub connect_retries: u32,

    /// Backoff between connection attempts
    pub backoff: CooldownOptions,

    /// Bound on the pre-deployment reachability probe
    pub probe_timeout: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(15),
            connect_retries: 3,
            backoff: CooldownOptions::default(),
            probe_timeout: Duration::from_secs(3),
        }
    }
}

/// Remote execution adapter
pub struct RemoteExecutor {
    transport: Arc<dyn Transport>,
    options: ExecutorOptions,
}

#[derive(Default)]
struct Progress {
    started: usize,
    current: Option<String>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl RemoteExecutor {
    pub fn new(transport: Arc<dyn Transport>, options: ExecutorOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    /// Reachability probe. Runs nothing on the asset and writes no log entry.
    pub async fn probe(&self, asset: &Asset) -> Result<(), String> {
        self.transport.probe(asset, self.options.probe_timeout).await
    }

    /// Open a connection, retrying transient failures with backoff
    pub async fn connect(&self, asset: &Asset) -> Result<Box<dyn Connection>, OrchestratorError> {
        self.connect_with_retry(asset)
            .await
            .map_err(|(e, attempts)| OrchestratorError::Connection {
                asset_id: asset.id.clone(),
                message: format!("{} (after {} attempts)", e, attempts),
            })
    }

    async fn connect_with_retry(
        &self,
        asset: &Asset,
    ) -> Result<Box<dyn Connection>, (ConnectError, u32)> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = match tokio::time::timeout(
                self.options.connect_timeout,
                self.transport.connect(asset),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ConnectError::transient(format!(
                    "connect timed out after {:?}",
                    self.options.connect_timeout
                ))),
            };

            match result {
                Ok(conn) => return Ok(conn),
                Err(e) if e.transient && attempt <= self.options.connect_retries => {
                    let delay = calc_exp_backoff(&self.options.backoff, attempt - 1);
                    warn!(
                        asset_id = %asset.id,
                        attempt,
                        "Connection failed: {}, retrying in {:?}",
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }

    /// Run `commands` in order on the asset, stopping at the first failure.
    ///
    /// The whole sequence is bounded by `timeout` (or the configured default).
    /// On timeout the in-flight command is dropped, which terminates it, and
    /// the connection is released. Never returns an error: failures are
    /// carried in the result.
    pub async fn execute(
        &self,
        asset: &Asset,
        commands: &[String],
        phase: Phase,
        timeout: Option<Duration>,
        log: &ExecutionLog,
    ) -> ExecutionResult {
        let started = Instant::now();

        let mut conn = match self.connect_with_retry(asset).await {
            Ok(conn) => conn,
            Err((e, attempts)) => {
                return ExecutionResult {
                    asset_id: asset.id.clone(),
                    phase,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.message.clone(),
                    success: false,
                    commands_started: 0,
                    failure: Some(ExecutionFailure::Connection {
                        message: e.message,
                        attempts,
                    }),
                    duration_ms: started.elapsed().as_millis() as u64,
                };
            }
        };

        let timeout = timeout.unwrap_or(self.options.command_timeout);
        let mut progress = Progress::default();

        let outcome = tokio::time::timeout(
            timeout,
            run_sequence(conn.as_mut(), asset, commands, phase, log, &mut progress),
        )
        .await;

        let failure = match outcome {
            Ok(Ok(())) => {
                conn.close().await;
                None
            }
            Ok(Err(failure)) => {
                conn.close().await;
                Some(failure)
            }
            Err(_) => {
                // The session may be wedged, so it is dropped rather than closed
                drop(conn);
                warn!(asset_id = %asset.id, %phase, "Command sequence timed out after {:?}", timeout);
                if let Some(command) = progress.current.take() {
                    log.append(LogEntry {
                        asset_id: asset.id.clone(),
                        phase,
                        command,
                        exit_code: None,
                        stdout: String::new(),
                        stderr: format!("terminated after {:?}", timeout),
                        timestamp: Utc::now(),
                    });
                }
                Some(ExecutionFailure::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        };

        ExecutionResult {
            asset_id: asset.id.clone(),
            phase,
            exit_code: progress.exit_code,
            stdout: progress.stdout,
            stderr: progress.stderr,
            success: failure.is_none(),
            commands_started: progress.started,
            failure,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Run one command on an open connection, logging it
    pub async fn run_logged(
        &self,
        conn: &mut dyn Connection,
        asset: &Asset,
        command: &str,
        phase: Phase,
        timeout: Duration,
        log: &ExecutionLog,
    ) -> Result<CommandOutput, ExecutionFailure> {
        match tokio::time::timeout(timeout, conn.run(command)).await {
            Ok(Ok(output)) => {
                log.append(entry(asset, phase, command, Some(output.exit_code), &output.stdout, &output.stderr));
                Ok(output)
            }
            Ok(Err(e)) => {
                log.append(entry(asset, phase, command, None, "", &e.to_string()));
                Err(ExecutionFailure::Spawn {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                log.append(entry(asset, phase, command, None, "", "timed out"));
                Err(ExecutionFailure::Timeout {
                    after_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

async fn run_sequence(
    conn: &mut dyn Connection,
    asset: &Asset,
    commands: &[String],
    phase: Phase,
    log: &ExecutionLog,
    progress: &mut Progress,
) -> Result<(), ExecutionFailure> {
    for command in commands {
        progress.started += 1;
        progress.current = Some(command.clone());
        debug!(asset_id = %asset.id, %phase, "Running: {}", command);

        let output = match conn.run(command).await {
            Ok(output) => output,
            Err(e) => {
                progress.current = None;
                log.append(entry(asset, phase, command, None, "", &e.to_string()));
                progress.stderr.push_str(&e.to_string());
                return Err(ExecutionFailure::Spawn {
                    message: e.to_string(),
                });
            }
        };

        progress.current = None;
        log.append(entry(
            asset,
            phase,
            command,
            Some(output.exit_code),
            &output.stdout,
            &output.stderr,
        ));
        progress.exit_code = Some(output.exit_code);
        progress.stdout.push_str(&output.stdout);
        progress.stderr.push_str(&output.stderr);

        if !output.success() {
            return Err(ExecutionFailure::NonZeroExit {
                command: command.clone(),
                exit_code: output.exit_code,
            });
        }
    }
    Ok(())
}

fn entry(
    asset: &Asset,
    phase: Phase,
    command: &str,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> LogEntry {
    LogEntry {
        asset_id: asset.id.clone(),
        phase,
        command: command.to_string(),
        exit_code,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        timestamp: Utc::now(),
    }
}
