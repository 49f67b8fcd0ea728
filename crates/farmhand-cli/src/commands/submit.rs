//! Submit command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use farmhand_sched::{
    CommandToken, DependencyGraph, DispatchTarget, MonitoringClient, QueueCommand, QueueRequest,
    SubmissionSpec, parse_backend_arguments,
};

use super::common::{Session, WaitArgs, print_handles, register_task, wait_all};

/// Type label under which single submissions are registered for monitoring.
const JOB_TYPE: &str = "job";

/// Arguments of `farmhand submit`.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub processes: u32,
    pub min_success: Option<u32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub arguments: Vec<String>,
    pub stdin_script: Option<PathBuf>,
    pub command: Vec<String>,
}

/// One word is a command line to tokenize; several are already tokens.
fn queue_command(command: Vec<String>) -> QueueCommand {
    match command.len() {
        0 => QueueCommand::None,
        1 => QueueCommand::Line(command.into_iter().collect()),
        _ => QueueCommand::Tokens(command.into_iter().map(CommandToken::Literal).collect()),
    }
}

impl SubmitRequest {
    /// Build the queue request for `backend`.
    pub fn into_queue_request(self, backend: &str, script: Option<String>) -> Result<QueueRequest> {
        let mut request = QueueRequest::new(self.name, queue_command(self.command));
        request.process_count = self.processes;
        request.min_success = self.min_success;
        request.stdout = self.stdout;
        request.stderr = self.stderr;
        request.stdin_script = script;
        request.backend_arguments = parse_backend_arguments(&self.arguments, backend)?;
        Ok(request)
    }
}

/// Monitoring task for a single submission, labelled like the task its jobs
/// report to.
fn monitoring_task(spec: &Arc<SubmissionSpec>) -> Result<DependencyGraph> {
    let target = DispatchTarget::Spec(spec);
    Ok(DependencyGraph::from_roots(target.task_label(), [Arc::clone(spec)])?)
}

/// Execute the submit command.
pub async fn execute(session: &Session, request: SubmitRequest, wait: &WaitArgs) -> Result<()> {
    let script = match &request.stdin_script {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read script: {}", path.display()))?,
        ),
        None => None,
    };

    let backend = session.backend.as_ref();
    let spec = backend.queue(request.into_queue_request(backend.backend_type(), script)?)?;
    tracing::info!(job = spec.name(), command = %spec.command_display(), "Submitting");

    let monitoring = MonitoringClient::connect(session.config.monitoring.clone(), None).await;
    let handles = backend.dispatch(DispatchTarget::Spec(&spec)).await?;
    if let Some(client) = &monitoring {
        register_task(client, JOB_TYPE, &monitoring_task(&spec)?, &handles).await?;
    }
    print_handles(backend.backend_type(), &handles);

    if wait.wait {
        wait_all(backend, &handles, &wait.policy()).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &[&str], arguments: &[&str]) -> SubmitRequest {
        SubmitRequest {
            name: "sim".into(),
            processes: 4,
            min_success: Some(3),
            stdout: Some("sim.{jIndex}.out".into()),
            stderr: None,
            arguments: arguments.iter().map(|s| s.to_string()).collect(),
            stdin_script: None,
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_single_word_is_tokenized() {
        let queued = request(&["run.sh --seed 3"], &[])
            .into_queue_request("LSF", None)
            .unwrap();
        assert_eq!(queued.command, QueueCommand::Line("run.sh --seed 3".into()));
        assert_eq!(queued.process_count, 4);
        assert_eq!(queued.min_success, Some(3));
    }

    #[test]
    fn test_scoped_arguments() {
        let queued = request(&["run.sh", "--seed", "3"], &["queue=short", "queue:lsf=long", "W:htcondor=1"])
            .into_queue_request("LSF", None)
            .unwrap();
        assert!(matches!(queued.command, QueueCommand::Tokens(ref t) if t.len() == 3));
        assert_eq!(queued.backend_arguments.get("queue").map(String::as_str), Some("long"));
        assert!(!queued.backend_arguments.contains_key("W"));
    }

    #[tokio::test]
    async fn test_registered_task_matches_job_environment() {
        use farmhand_sched::{BatchBackend, LsfAdapter, LsfConfig, ProcessRunner, ScriptedRunner};

        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("Job <12> is submitted to queue <normal>.\n", "", 0);
        let config = LsfConfig {
            monitoring_url: Some("http://mon:5000".into()),
            ..Default::default()
        };
        let backend = LsfAdapter::new(config, Arc::clone(&runner) as Arc<dyn ProcessRunner>);

        let spec = backend
            .queue(request(&["run.sh"], &[]).into_queue_request("LSF", None).unwrap())
            .unwrap();
        backend.dispatch(DispatchTarget::Spec(&spec)).await.unwrap();
        let task = monitoring_task(&spec).unwrap();

        assert_eq!(task.label(), "sim");
        assert_eq!(task.len(), 1);
        let argv = &runner.invocations()[0].argv;
        let env = argv.iter().position(|arg| arg == "-env").unwrap();
        assert!(argv[env + 1].contains(&format!("FARMHAND_TASK_LABEL={}", task.label())));
    }

    #[test]
    fn test_script_without_command() {
        let queued = request(&[], &[])
            .into_queue_request("HTCondor", Some("#!/bin/sh\necho hi\n".into()))
            .unwrap();
        assert_eq!(queued.command, QueueCommand::None);
        assert!(queued.stdin_script.is_some());
    }
}
