use chrono::Utc;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;
use zabra_core::{CommandInvocation, CommandReport, Result, ZabraError, MAX_APPLY_TIMEOUT};

use crate::process;

/// How long to keep draining pipes after the child exits. A grandchild that
/// inherited the pipes can hold them open indefinitely.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(1);

enum Completion {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
}

/// Runs external commands, each bounded by a wall-clock timeout
#[derive(Debug, Clone)]
pub struct CommandRunner {
    default_timeout: Duration,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            default_timeout: MAX_APPLY_TIMEOUT,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Build an invocation that uses this runner's default timeout.
    pub fn invocation(&self, program: &str, args: &[String]) -> CommandInvocation {
        CommandInvocation::new(program)
            .args(args.iter().cloned())
            .with_timeout(self.default_timeout)
    }

    /// Run one command, killing it if it outlives `invocation.timeout`.
    ///
    /// Returns exactly one of: a report on zero exit, `TimeoutError`,
    /// `ExecutionError` carrying the combined output, `OutputCollectionError`
    /// when that output could not be read, or `LaunchError` when the program
    /// never started. Progress and failures are also printed.
    pub async fn run(&self, invocation: &CommandInvocation) -> Result<CommandReport> {
        invocation.validate()?;

        let id = Uuid::new_v4();
        let program = invocation.program.as_str();
        println!("Running command \"{}\"", invocation.command_line());
        info!(
            invocation_id = %id,
            program = %program,
            timeout_ms = invocation.timeout.as_millis() as u64,
            "Running command"
        );

        let started_at = Utc::now();
        let start_instant = Instant::now();

        let mut child = process::spawn(invocation)?;
        let collector = process::collect_combined_output(&mut child);

        let completion = tokio::select! {
            status = child.wait() => Completion::Exited(status),
            _ = tokio::time::sleep(invocation.timeout) => Completion::TimedOut,
        };

        let status = match completion {
            Completion::TimedOut => {
                process::terminate(&mut child, program).await;
                collector.abort();
                warn!(invocation_id = %id, program = %program, "Command timed out");
                let err = ZabraError::TimeoutError {
                    program: program.to_string(),
                    timeout: invocation.timeout,
                };
                eprintln!("{}", err);
                return Err(err);
            }
            Completion::Exited(status) => status,
        };

        let (reason, exit_code) = match status {
            Ok(status) if status.success() => {
                let output = match drain(collector).await {
                    Ok(output) => output,
                    Err(reason) => {
                        warn!(
                            invocation_id = %id,
                            program = %program,
                            reason = %reason,
                            "Discarding command output"
                        );
                        String::new()
                    }
                };
                let duration_ms = start_instant.elapsed().as_millis() as u64;
                println!("Command {} completed successfully", program);
                info!(
                    invocation_id = %id,
                    program = %program,
                    duration_ms,
                    "Command completed"
                );
                return Ok(CommandReport {
                    id,
                    program: program.to_string(),
                    args: invocation.args.clone(),
                    exit_code: status.code(),
                    output,
                    duration_ms,
                    started_at,
                    completed_at: Utc::now(),
                });
            }
            Ok(status) => (status.to_string(), status.code()),
            Err(e) => (format!("failed to wait for process: {}", e), None),
        };

        eprintln!("Command {} returned err {}", program, reason);
        warn!(
            invocation_id = %id,
            program = %program,
            exit_code = ?exit_code,
            "Command failed"
        );

        match drain(collector).await {
            Ok(output) => {
                eprint!("{}", output);
                Err(ZabraError::ExecutionError {
                    program: program.to_string(),
                    reason,
                    exit_code,
                    output,
                })
            }
            Err(collection_reason) => {
                let err = ZabraError::OutputCollectionError {
                    program: program.to_string(),
                    reason: collection_reason,
                };
                eprintln!("{}", err);
                Err(err)
            }
        }
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `program` with `args`, bounded by `timeout`.
pub async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandReport> {
    let invocation = CommandInvocation::new(program)
        .args(args.iter().cloned())
        .with_timeout(timeout);
    CommandRunner::new().run(&invocation).await
}

async fn drain(
    mut collector: JoinHandle<std::io::Result<Vec<u8>>>,
) -> std::result::Result<String, String> {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut collector).await {
        Ok(Ok(Ok(bytes))) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Ok(Ok(Err(e))) => Err(format!("failed to read output: {}", e)),
        Ok(Err(e)) => Err(format!("output reader stopped: {}", e)),
        Err(_) => {
            collector.abort();
            Err(format!(
                "output still open {}ms after exit",
                OUTPUT_DRAIN_GRACE.as_millis()
            ))
        }
    }
}
