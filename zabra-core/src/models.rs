use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, ZabraError};

/// Default ceiling for commands that don't carry their own timeout.
pub const MAX_APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// A single request to run one external program with fixed arguments and a deadline
#[derive(Debug, Clone, PartialEq)]
pub struct CommandInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub working_directory: Option<PathBuf>,
    /// Added on top of the inherited parent environment
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: MAX_APPLY_TIMEOUT,
            working_directory: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.working_directory = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Reject invocations that could never run or would time out immediately.
    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(ZabraError::InvalidInvocation(
                "program name must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ZabraError::InvalidInvocation(format!(
                "timeout for {} must be positive",
                self.program
            )));
        }
        Ok(())
    }

    /// Program and arguments as a single line, for progress output.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            return self.program.clone();
        }
        format!("{} {}", self.program, self.args.join(" "))
    }
}

/// Record of a command that completed successfully within its deadline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReport {
    pub id: Uuid,
    pub program: String,
    pub args: Vec<String>,
    pub exit_code: Option<i32>,
    /// Combined stdout and stderr, in arrival order
    pub output: String,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}
