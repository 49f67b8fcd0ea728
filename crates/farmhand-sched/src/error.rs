//! Error handling for batch submission.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for submission operations.
pub type SchedResult<T> = Result<T, SchedError>;

/// Captured result of a backend command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Create an output record from its parts.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(rc) => write!(f, "rc={rc}")?,
            None => write!(f, "rc=<signal>")?,
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "; stdout: {}", self.stdout.trim())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "; stderr: {}", self.stderr.trim())?;
        }
        Ok(())
    }
}

/// Errors that can occur while building, submitting or tracking jobs.
#[derive(Error, Debug)]
pub enum SchedError {
    /// Malformed caller input.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A job depends on itself, directly or transitively.
    #[error("Dependency cycle detected involving job {job}")]
    DependencyCycle { job: String },

    /// Two distinct jobs share a name within one graph.
    #[error("Duplicate job name: {0}")]
    DuplicateJobName(String),

    /// The submission command failed or its reply could not be understood.
    #[error("Submission failed: {reason} ({output})")]
    SubmissionFailure {
        reason: String,
        output: CommandOutput,
    },

    /// The job listing command failed.
    #[error("Job listing failed: {reason} ({output})")]
    JListFailure {
        reason: String,
        output: CommandOutput,
    },

    /// A backend executable could not be spawned.
    #[error("Command failed: {command} - {message}")]
    CommandError { command: String, message: String },

    /// A backend command exceeded its time budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend does not know the job.
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The backend cannot express the requested operation.
    #[error("Unsupported by {backend}: {message}")]
    Unsupported { backend: String, message: String },

    /// No backend registered under the requested name.
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// A dependency graph or its encoding is malformed.
    #[error("Invalid graph: {0}")]
    InvalidGraph(String),

    /// Monitoring protocol error.
    #[error("Monitoring error: {0}")]
    MonitoringError(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl SchedError {
    /// Build a `SubmissionFailure` from a reason and captured output.
    pub fn submission(reason: impl Into<String>, output: CommandOutput) -> Self {
        SchedError::SubmissionFailure {
            reason: reason.into(),
            output,
        }
    }

    /// Build a `JListFailure` from a reason and captured output.
    pub fn listing(reason: impl Into<String>, output: CommandOutput) -> Self {
        SchedError::JListFailure {
            reason: reason.into(),
            output,
        }
    }

    /// Captured backend output, if this error carries any.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            SchedError::SubmissionFailure { output, .. } | SchedError::JListFailure { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

impl From<serde_yaml_ng::Error> for SchedError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        SchedError::ConfigError(e.to_string())
    }
}

impl From<reqwest::Error> for SchedError {
    fn from(e: reqwest::Error) -> Self {
        SchedError::MonitoringError(e.to_string())
    }
}
