//! Process invocation for backend executables.
//!
//! Adapters never spawn processes themselves; they hand an [`Invocation`] to
//! a [`ProcessRunner`]. [`TokioRunner`] runs the real executables while
//! [`ScriptedRunner`] replays canned replies.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CommandOutput, SchedError, SchedResult};

/// Default time budget of a single backend command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// A command line to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    /// Text fed to the standard input.
    pub stdin: Option<String>,
    /// Time budget.
    pub timeout: Duration,
}

impl Invocation {
    /// Create an invocation with the default timeout.
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Feed text to the standard input.
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    /// Set the time budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Program name.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    /// Space-joined command line for logging.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// Runs backend executables.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command and capture its output.
    ///
    /// A non-zero exit code is not an error here; spawn failures and
    /// timeouts are.
    async fn run(&self, invocation: &Invocation) -> SchedResult<CommandOutput>;
}

/// Runner backed by `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioRunner;

#[async_trait]
impl ProcessRunner for TokioRunner {
    async fn run(&self, invocation: &Invocation) -> SchedResult<CommandOutput> {
        let (program, args) = invocation
            .argv
            .split_first()
            .ok_or_else(|| SchedError::InvalidCommand("empty argument vector".into()))?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SchedError::CommandError {
                command: program.clone(),
                message: e.to_string(),
            })?;

        // Feed stdin from its own task so a child filling its output pipes
        // before draining stdin cannot stall the write.
        let writer = match (invocation.stdin.clone(), child.stdin.take()) {
            (Some(text), Some(mut pipe)) => Some(tokio::spawn(async move {
                pipe.write_all(text.as_bytes()).await?;
                pipe.shutdown().await
            })),
            _ => None,
        };
        let run = async move {
            let output = child.wait_with_output().await?;
            if let Some(writer) = writer {
                match writer.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(error = %e, "Child closed stdin before reading all input"),
                    Err(e) => return Err(std::io::Error::other(e)),
                }
            }
            Ok::<_, std::io::Error>(output)
        };

        let output = tokio::time::timeout(invocation.timeout, run)
            .await
            .map_err(|_| {
                SchedError::Timeout(format!(
                    "{program} timed out after {}s",
                    invocation.timeout.as_secs()
                ))
            })?
            .map_err(|e| SchedError::CommandError {
                command: program.clone(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

#[derive(Debug)]
enum ScriptedReply {
    Output(CommandOutput),
    SpawnFailure(String),
    Timeout,
}

/// Runner replaying queued replies and recording every invocation.
///
/// Used by tests and dry runs.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    replies: Mutex<VecDeque<ScriptedReply>>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Create a runner with no queued replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply.
    pub fn push_reply(&self, stdout: &str, stderr: &str, exit_code: i32) -> &Self {
        self.push(ScriptedReply::Output(CommandOutput::new(
            stdout, stderr, exit_code,
        )))
    }

    /// Queue a spawn failure.
    pub fn push_spawn_failure(&self, message: &str) -> &Self {
        self.push(ScriptedReply::SpawnFailure(message.to_string()))
    }

    /// Queue a timeout.
    pub fn push_timeout(&self) -> &Self {
        self.push(ScriptedReply::Timeout)
    }

    fn push(&self, reply: ScriptedReply) -> &Self {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reply);
        self
    }

    /// Everything run so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of commands run so far.
    pub fn call_count(&self) -> usize {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> SchedResult<CommandOutput> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        match reply {
            Some(ScriptedReply::Output(output)) => Ok(output),
            Some(ScriptedReply::SpawnFailure(message)) => Err(SchedError::CommandError {
                command: invocation.program().to_string(),
                message,
            }),
            Some(ScriptedReply::Timeout) => Err(SchedError::Timeout(format!(
                "{} timed out",
                invocation.program()
            ))),
            None => Err(SchedError::CommandError {
                command: invocation.program().to_string(),
                message: "no scripted reply left".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_runner_captures_output() {
        let output = TokioRunner
            .run(&Invocation::new(["sh", "-c", "echo out; echo err >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, Some(3));
    }

    #[tokio::test]
    async fn test_tokio_runner_feeds_stdin() {
        let output = TokioRunner
            .run(&Invocation::new(["cat"]).with_stdin("inline script\n"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "inline script\n");
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_tokio_runner_large_stdin_round_trip() {
        // Larger than any pipe buffer, echoed back while still being written.
        let script = "x".repeat(1 << 20);
        let output = TokioRunner
            .run(&Invocation::new(["cat"]).with_stdin(script.clone()))
            .await
            .unwrap();
        assert_eq!(output.stdout.len(), script.len());
        assert!(output.success());
    }

    #[tokio::test]
    async fn test_tokio_runner_ignores_unread_stdin() {
        let output = TokioRunner
            .run(&Invocation::new(["true"]).with_stdin("y".repeat(1 << 20)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_tokio_runner_spawn_failure() {
        let err = TokioRunner
            .run(&Invocation::new(["/nonexistent/condor_submit"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::CommandError { ref command, .. } if command == "/nonexistent/condor_submit"));
    }

    #[tokio::test]
    async fn test_tokio_runner_timeout() {
        let err = TokioRunner
            .run(&Invocation::new(["sleep", "5"]).with_timeout(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_scripted_runner_replays_in_order() {
        let runner = ScriptedRunner::new();
        runner.push_reply("first", "", 0).push_timeout();

        let out = runner.run(&Invocation::new(["a"])).await.unwrap();
        assert_eq!(out.stdout, "first");
        assert!(matches!(
            runner.run(&Invocation::new(["b"])).await,
            Err(SchedError::Timeout(_))
        ));
        assert!(runner.run(&Invocation::new(["c"])).await.is_err());
        assert_eq!(runner.call_count(), 3);
        assert_eq!(runner.invocations()[1].argv, vec!["b".to_string()]);
    }
}
