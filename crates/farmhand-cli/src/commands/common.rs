//! Shared helpers for CLI commands.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use console::{StyledObject, style};

use farmhand_sched::{
    ActiveJobInfo, BackendRegistry, BatchBackend, DependencyGraph, FarmhandConfig, JobHandle,
    JobState, MonitoringClient, RegistrationOutcome, TokioRunner, WaitOutcome, WaitPolicy,
};

/// Options controlling `--wait` after a submission.
#[derive(Debug, Clone, Args)]
pub struct WaitArgs {
    /// Wait for the dispatched jobs to finish
    #[arg(short, long)]
    pub wait: bool,

    /// Maximum polling attempts per job (unlimited if omitted)
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Seconds between polling attempts
    #[arg(long, default_value = "60")]
    pub interval: u64,
}

impl WaitArgs {
    pub fn policy(&self) -> WaitPolicy {
        wait_policy(self.attempts, self.interval)
    }
}

/// Wait policy from CLI values; every attempt is reported.
pub fn wait_policy(attempts: Option<u32>, interval_secs: u64) -> WaitPolicy {
    WaitPolicy {
        max_attempts: attempts,
        interval: Duration::from_secs(interval_secs),
        report: true,
    }
}

/// Load the configuration, applying a `--backend` override.
pub fn load_config(path: Option<&Path>, backend: Option<&str>) -> Result<FarmhandConfig> {
    let mut config = FarmhandConfig::load(path).context("Failed to load configuration")?;
    if let Some(backend) = backend {
        config.backend = backend.to_string();
        config.validate()?;
    }
    Ok(config)
}

/// Loaded configuration plus the backend it selects.
pub struct Session {
    pub config: FarmhandConfig,
    pub backend: Box<dyn BatchBackend>,
}

impl Session {
    /// Load the configuration and create its backend.
    pub fn open(path: Option<&Path>, backend: Option<&str>) -> Result<Self> {
        Self::with_config(load_config(path, backend)?)
    }

    /// Create the backend selected by `config`.
    pub fn with_config(config: FarmhandConfig) -> Result<Self> {
        let backend = BackendRegistry::with_builtins().create(
            &config.backend,
            &config.backend_settings(),
            Arc::new(TokioRunner),
        )?;
        tracing::debug!(backend = backend.backend_type(), "Backend ready");
        Ok(Self { config, backend })
    }

    /// Handle for an identifier typed on the command line.
    pub fn handle(&self, id: &str) -> JobHandle {
        JobHandle::from_native(self.backend.backend_type(), id)
    }
}

/// Style a job state for terminal output.
pub fn styled_state(state: JobState) -> StyledObject<&'static str> {
    let name = state.name();
    match state {
        JobState::Done => style(name).green(),
        JobState::Failed => style(name).red(),
        JobState::Pending | JobState::Suspended => style(name).yellow(),
        JobState::Running => style(name).cyan(),
        JobState::Unknown => style(name).dim(),
    }
}

/// Print dispatched handles.
pub fn print_handles(backend: &str, handles: &[JobHandle]) {
    println!(
        "{} Dispatched {} job(s) to {}:",
        style("✓").green().bold(),
        handles.len(),
        style(backend).cyan()
    );
    for handle in handles {
        println!("  {:<24} {}", handle.name, style(&handle.id).yellow());
        for (key, value) in &handle.auxiliary {
            println!("    {}: {}", style(key).dim(), value);
        }
    }
}

/// Print one listing row.
pub fn print_job(job: &ActiveJobInfo) {
    println!(
        "  {:<20}  {:<24}  {:<10}  {:<10}  {:<12}  {}",
        style(&job.id).dim(),
        job.name.as_deref().unwrap_or("-"),
        styled_state(job.state),
        job.native_state,
        job.queue.as_deref().unwrap_or("-"),
        job.submitted.as_deref().unwrap_or("-"),
    );
}

/// Register `graph` as a monitoring task and print the outcome.
///
/// Only transport failures are errors; a refusing server is reported and
/// the dispatch stands.
pub async fn register_task(
    client: &MonitoringClient,
    type_label: &str,
    graph: &DependencyGraph,
    handles: &[JobHandle],
) -> Result<()> {
    let outcome = client
        .register(graph.label(), Some(type_label), graph, handles)
        .await?;
    match outcome {
        RegistrationOutcome::Created => println!(
            "{} Monitoring task {}",
            style("✓").green().bold(),
            client.task_url(graph.label())
        ),
        RegistrationOutcome::AlreadyExists => println!(
            "{} Monitoring task {} already exists",
            style("!").yellow().bold(),
            graph.label()
        ),
        RegistrationOutcome::Rejected { status, body } => println!(
            "{} Monitoring rejected the task ({status}): {body}",
            style("!").yellow().bold()
        ),
        RegistrationOutcome::Unreachable => println!(
            "{} Monitoring unreachable; continuing without it",
            style("!").yellow().bold()
        ),
    }
    Ok(())
}

/// Wait for every handle in turn; fails unless all finish successfully.
pub async fn wait_all(
    backend: &dyn BatchBackend,
    handles: &[JobHandle],
    policy: &WaitPolicy,
) -> Result<()> {
    for handle in handles {
        let outcome = backend.wait(handle, policy).await?;
        report_outcome(handle, outcome)?;
    }
    Ok(())
}

/// Print how a wait ended; anything but success is an error.
pub fn report_outcome(handle: &JobHandle, outcome: WaitOutcome) -> Result<()> {
    match outcome {
        WaitOutcome::Finished(state) => {
            println!(
                "{} {} ({}) finished: {}",
                style("→").cyan().bold(),
                handle.name,
                style(&handle.id).dim(),
                styled_state(state).bold()
            );
            if !state.is_success() {
                anyhow::bail!("job {} ended in state {}", handle.id, state.name());
            }
            Ok(())
        }
        WaitOutcome::GaveUp { attempts } => {
            anyhow::bail!("gave up on job {} after {attempts} attempt(s)", handle.id)
        }
        WaitOutcome::Vanished { attempts } => anyhow::bail!(
            "job {} disappeared from the listing after {attempts} attempt(s); its outcome is unknown",
            handle.id
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use farmhand_sched::JobId;

    #[test]
    fn test_wait_policy_from_args() {
        let policy = wait_policy(Some(3), 0);
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.interval, Duration::ZERO);
        assert!(policy.report);
        assert_eq!(wait_policy(None, 60).max_attempts, None);
    }

    #[test]
    fn test_report_outcome() {
        let handle = JobHandle::new("LSF", "sim", JobId::Token("7".into()));
        assert!(report_outcome(&handle, WaitOutcome::Finished(JobState::Done)).is_ok());
        assert!(report_outcome(&handle, WaitOutcome::Finished(JobState::Failed)).is_err());
        let err = report_outcome(&handle, WaitOutcome::GaveUp { attempts: 3 }).unwrap_err();
        assert!(err.to_string().contains("3 attempt"));
    }
}
