// Child process plumbing: spawning, draining output, forced termination

use std::io::{Error, ErrorKind};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error};
use zabra_core::{CommandInvocation, Result, ZabraError};

const READ_CHUNK_BYTES: usize = 8192;

/// Locate the program on PATH (or as given, if it contains a path separator).
pub fn resolve_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| ZabraError::LaunchError {
        program: program.to_string(),
        source: Error::new(ErrorKind::NotFound, e.to_string()),
    })
}

/// Start the child with stdin closed and both output streams piped.
pub fn spawn(invocation: &CommandInvocation) -> Result<Child> {
    let binary = resolve_program(&invocation.program)?;
    debug!(program = %invocation.program, path = %binary.display(), "Resolved program");

    let mut command = Command::new(binary);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &invocation.working_directory {
        command.current_dir(dir);
    }

    command.spawn().map_err(|source| ZabraError::LaunchError {
        program: invocation.program.clone(),
        source,
    })
}

/// Move the child's pipes into a background task that merges them into one
/// buffer in arrival order. The handle yields the buffer once both close.
pub fn collect_combined_output(child: &mut Child) -> JoinHandle<std::io::Result<Vec<u8>>> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    tokio::spawn(read_combined(stdout, stderr))
}

async fn read_combined(
    mut stdout: Option<ChildStdout>,
    mut stderr: Option<ChildStderr>,
) -> std::io::Result<Vec<u8>> {
    let mut combined = Vec::new();
    let mut out_buf = [0u8; READ_CHUNK_BYTES];
    let mut err_buf = [0u8; READ_CHUNK_BYTES];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_buf), if stdout.is_some() => {
                match read? {
                    0 => stdout = None,
                    n => combined.extend_from_slice(&out_buf[..n]),
                }
            }
            read = read_chunk(&mut stderr, &mut err_buf), if stderr.is_some() => {
                match read? {
                    0 => stderr = None,
                    n => combined.extend_from_slice(&err_buf[..n]),
                }
            }
        }
    }

    Ok(combined)
}

async fn read_chunk<R>(pipe: &mut Option<R>, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match pipe {
        Some(reader) => reader.read(buf).await,
        None => Ok(0),
    }
}

/// Kill and reap a child that overran its deadline.
///
/// A child we cannot stop would keep running untracked, so failure here
/// aborts the whole process instead of returning.
pub async fn terminate(child: &mut Child, program: &str) {
    if let Err(e) = child.kill().await {
        error!(program = %program, error = %e, "Failed to kill command");
        eprintln!("Failed to kill command {}, err {}", program, e);
        std::process::abort();
    }
    debug!(program = %program, "Killed command after timeout");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_program_finds_sh() {
        let path = resolve_program("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_resolve_program_missing_is_launch_error() {
        let err = resolve_program("zabra-definitely-not-installed").unwrap_err();
        match err {
            ZabraError::LaunchError { program, source } => {
                assert_eq!(program, "zabra-definitely-not-installed");
                assert_eq!(source.kind(), ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_collect_combined_output_merges_streams() {
        let invocation = CommandInvocation::new("sh")
            .arg("-c")
            .arg("echo out; sleep 0.1; echo err 1>&2");
        let mut child = spawn(&invocation).unwrap();
        let collector = collect_combined_output(&mut child);

        let status = child.wait().await.unwrap();
        assert!(status.success());

        let output = collector.await.unwrap().unwrap();
        assert_eq!(String::from_utf8_lossy(&output), "out\nerr\n");
    }

    #[tokio::test]
    async fn test_spawn_applies_env_and_working_directory() {
        let dir = std::env::temp_dir();
        let invocation = CommandInvocation::new("sh")
            .arg("-c")
            .arg("printf '%s:%s' \"$ZABRA_TEST_VALUE\" \"$(pwd)\"")
            .with_env("ZABRA_TEST_VALUE", "hello")
            .with_working_directory(&dir);
        let mut child = spawn(&invocation).unwrap();
        let collector = collect_combined_output(&mut child);
        child.wait().await.unwrap();

        let output = String::from_utf8(collector.await.unwrap().unwrap()).unwrap();
        let expected_dir = dir.canonicalize().unwrap();
        assert_eq!(output, format!("hello:{}", expected_dir.display()));
    }

    #[tokio::test]
    async fn test_terminate_stops_running_child() {
        let invocation = CommandInvocation::new("sleep").arg("30");
        let mut child = spawn(&invocation).unwrap();
        terminate(&mut child, "sleep").await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
