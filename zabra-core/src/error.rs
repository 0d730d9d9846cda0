use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ZabraError {
    #[error("Invalid command invocation: {0}")]
    InvalidInvocation(String),

    #[error("Failed to launch command {program}")]
    LaunchError {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command {program} timed out after {timeout:?}")]
    TimeoutError { program: String, timeout: Duration },

    #[error("Command {program} returned err {reason}")]
    ExecutionError {
        program: String,
        reason: String,
        exit_code: Option<i32>,
        output: String,
    },

    #[error("Failed to collect output of command {program}: {reason}")]
    OutputCollectionError { program: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl ZabraError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ZabraError::TimeoutError { .. })
    }

    /// Exit code of a command that ran and failed, if the OS reported one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ZabraError::ExecutionError { exit_code, .. } => *exit_code,
            _ => None,
        }
    }

    /// Combined stdout/stderr captured from a failed command.
    pub fn output(&self) -> Option<&str> {
        match self {
            ZabraError::ExecutionError { output, .. } => Some(output.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ZabraError>;
