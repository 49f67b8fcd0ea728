//! LSF adapter for job submission and tracking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, debug, error, info, info_span};

use crate::backend::{
    AUX_QUEUE, AUX_STDERR, AUX_STDOUT, ActiveJobInfo, BatchBackend, DispatchTarget, JobHandle,
    JobId, JobLogs, JobState, Poll, WaitOutcome, WaitPolicy, make_executable, poll_loop, read_log,
    write_artifact,
};
use crate::error::{CommandOutput, SchedError, SchedResult};
use crate::lsf::parser;
use crate::lsf::templates::{self, BsubOption};
use crate::monitoring::MonitoringEnv;
use crate::process::{Invocation, ProcessRunner};
use crate::spec::SubmissionSpec;

/// Backend type name.
pub const LSF_BACKEND: &str = "LSF";

/// Auxiliary handle key: number of array members.
pub const AUX_ARRAY_SIZE: &str = "arraySize";

/// Paths of the LSF command-line tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsfExecutables {
    pub bsub: String,
    pub bjobs: String,
    pub bkill: String,
    pub bpeek: String,
}

impl Default for LsfExecutables {
    fn default() -> Self {
        Self {
            bsub: "bsub".to_string(),
            bjobs: "bjobs".to_string(),
            bkill: "bkill".to_string(),
            bpeek: "bpeek".to_string(),
        }
    }
}

/// Configuration for the LSF adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LsfConfig {
    /// Tool paths.
    pub executables: LsfExecutables,

    /// `bsub` options applied to every job, in order.
    pub bsub_defaults: Vec<BsubOption>,

    /// Options passed to every `bjobs` call.
    pub bjobs_options: Vec<String>,

    /// Directory for array dispatch scripts and default logs.
    pub work_dir: PathBuf,

    /// Tag distinguishing concurrent submissions of the same pipeline.
    pub submission_tag: Option<String>,

    /// Monitoring service URL handed to the jobs.
    pub monitoring_url: Option<String>,

    /// Monitoring API prefix handed to the jobs; the server default when absent.
    pub monitoring_prefix: Option<String>,

    /// Time budget of a single command, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for LsfConfig {
    fn default() -> Self {
        Self {
            executables: LsfExecutables::default(),
            bsub_defaults: Vec::new(),
            bjobs_options: vec!["-noheader".to_string(), "-wX".to_string()],
            work_dir: PathBuf::from("/tmp/farmhand-jobs"),
            submission_tag: None,
            monitoring_url: None,
            monitoring_prefix: None,
            command_timeout_secs: 30,
        }
    }
}

/// Adapter for the LSF batch system.
///
/// LSF has no counterpart to DAGMan: graphs with dependency edges are
/// rejected and have to be sequenced by the caller (see
/// [`dispatch_sequentially`](crate::backend::dispatch_sequentially)).
pub struct LsfAdapter {
    config: LsfConfig,
    runner: Arc<dyn ProcessRunner>,
    span: Span,
}

impl LsfAdapter {
    /// Create an adapter running commands through `runner`.
    pub fn new(config: LsfConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            span: info_span!("lsf"),
        }
    }

    /// Log under the given span instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &LsfConfig {
        &self.config
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    async fn run(&self, invocation: Invocation) -> SchedResult<CommandOutput> {
        let invocation = invocation.with_timeout(self.command_timeout());
        debug!(command = %invocation.display(), "Running LSF command");
        let output = self.runner.run(&invocation).await?;
        debug!(command = invocation.program(), rc = ?output.exit_code, "LSF command finished");
        Ok(output)
    }

    fn unsupported(message: String) -> SchedError {
        SchedError::Unsupported {
            backend: LSF_BACKEND.to_string(),
            message,
        }
    }

    async fn submit(&self, spec: &SubmissionSpec, task_label: &str) -> SchedResult<JobHandle> {
        let monitoring = self.config.monitoring_url.as_ref().map(|url| MonitoringEnv {
            url: url.clone(),
            api_prefix: self.config.monitoring_prefix.clone(),
            task_label: task_label.to_string(),
        });
        let command = templates::build_bsub_command(
            spec,
            &self.config.executables.bsub,
            &self.config.bsub_defaults,
            &self.config.work_dir,
            self.config.submission_tag.as_deref(),
            monitoring.as_ref(),
        )?;
        if let Some((path, body)) = &command.array_script {
            write_artifact(path, body).await?;
            make_executable(path).await?;
            info!(path = %path.display(), members = command.array_size, "LSF array dispatch script written");
        }

        let mut invocation = Invocation::new(command.argv.clone());
        if let Some(script) = &command.stdin {
            invocation = invocation.with_stdin(script.clone());
        }
        let output = self.run(invocation).await?;
        if !output.success() {
            error!(job = spec.name(), rc = ?output.exit_code, stderr = %output.stderr.trim(), "bsub failed");
            return Err(SchedError::submission(
                format!("bsub exited with {:?}", output.exit_code),
                output,
            ));
        }
        let reply = parser::parse_bsub_output(&output)?;
        info!(job = %command.job_name, id = %reply.job_id, queue = %reply.queue, "LSF job submitted");

        let mut handle = JobHandle::new(LSF_BACKEND, spec.name(), JobId::Token(reply.job_id))
            .with_aux(AUX_QUEUE, reply.queue)
            .with_aux(AUX_STDOUT, command.stdout)
            .with_aux(AUX_STDERR, command.stderr);
        if command.array_size > 1 {
            handle = handle.with_aux(AUX_ARRAY_SIZE, command.array_size.to_string());
        }
        Ok(handle)
    }

    /// Active listing followed by the recently finished one.
    async fn bjobs(&self, id: Option<&str>) -> SchedResult<Vec<ActiveJobInfo>> {
        let mut rows: Vec<ActiveJobInfo> = Vec::new();
        for finished in [false, true] {
            let mut argv = vec![self.config.executables.bjobs.clone()];
            argv.extend(self.config.bjobs_options.iter().cloned());
            if finished {
                argv.push("-d".to_string());
            }
            argv.extend(id.map(str::to_string));

            let output = self.run(Invocation::new(argv)).await?;
            if !output.success() {
                if parser::is_not_found(&output) {
                    continue;
                }
                return Err(SchedError::listing(
                    format!("bjobs exited with {:?}", output.exit_code),
                    output,
                ));
            }
            for row in parser::parse_bjobs_output(&output.stdout) {
                if !rows.iter().any(|known| known.id == row.id && known.name == row.name) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    async fn status(&self, handle: &JobHandle) -> SchedResult<ActiveJobInfo> {
        let query = handle.id.query_id();
        let mut rows: Vec<ActiveJobInfo> = self
            .bjobs(Some(&query))
            .await?
            .into_iter()
            .filter(|row| parser::listing_matches(&query, &row.id))
            .collect();
        match rows.len() {
            0 => Err(SchedError::JobNotFound(query)),
            1 => Ok(rows.swap_remove(0)),
            _ => ActiveJobInfo::aggregate(&query, &rows).ok_or(SchedError::JobNotFound(query)),
        }
    }

    async fn poll(&self, handle: &JobHandle) -> SchedResult<Poll> {
        match self.status(handle).await {
            Ok(info) if info.state.is_pollable() => Ok(Poll::Waiting(info.state)),
            Ok(info) if parser::lsf_state_flags(&info.native_state) & parser::STATE_ERROR != 0
                && info.state == JobState::Unknown =>
            {
                error!(id = %handle.id, state = %info.native_state, "LSF reports the job in an error state");
                Ok(Poll::Settled(JobState::Unknown))
            }
            Ok(info) => Ok(Poll::Settled(info.state)),
            Err(SchedError::JobNotFound(_)) => Ok(Poll::Vanished),
            Err(e) => Err(e),
        }
    }

    fn member_indices(handle: &JobHandle) -> Vec<String> {
        match handle.aux(AUX_ARRAY_SIZE).and_then(|n| n.parse::<u64>().ok()) {
            Some(n) if n > 1 => (1..=n).map(|i| i.to_string()).collect(),
            _ => vec!["0".to_string()],
        }
    }

    async fn peek(&self, target: String) -> SchedResult<String> {
        let program = self.config.executables.bpeek.clone();
        let output = self.run(Invocation::new([program.clone(), target])).await?;
        if !output.success() {
            return Err(SchedError::CommandError {
                command: program,
                message: output.to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn collect_logs(&self, handle: &JobHandle) -> SchedResult<JobLogs> {
        let missing = |key: &str| {
            SchedError::InvalidCommand(format!("handle {} records no {key} path", handle.id))
        };
        let stdout_template = handle.aux(AUX_STDOUT).ok_or_else(|| missing(AUX_STDOUT))?;
        let stderr_template = handle.aux(AUX_STDERR).ok_or_else(|| missing(AUX_STDERR))?;
        let job_id = handle.id.query_id();
        let indices = Self::member_indices(handle);
        let labelled = indices.len() > 1;

        let mut logs = JobLogs::default();
        for index in &indices {
            let expand = |template: &str| template.replace("%J", &job_id).replace("%I", index);
            let stdout_path = expand(stdout_template);
            let stderr_path = expand(stderr_template);

            if labelled {
                logs.stdout.push_str(&format!("==> {stdout_path} <==\n"));
                logs.stderr.push_str(&format!("==> {stderr_path} <==\n"));
            }
            if Path::new(&stdout_path).exists() {
                logs.stdout.push_str(&read_log(Path::new(&stdout_path)).await?);
            } else {
                let target = if labelled {
                    format!("{job_id}[{index}]")
                } else {
                    job_id.clone()
                };
                debug!(path = %stdout_path, target = %target, "Output file not written yet; peeking");
                logs.stdout.push_str(&self.peek(target).await?);
            }
            if Path::new(&stderr_path).exists() {
                logs.stderr.push_str(&read_log(Path::new(&stderr_path)).await?);
            }
        }
        Ok(logs)
    }
}

#[async_trait]
impl BatchBackend for LsfAdapter {
    fn backend_type(&self) -> &'static str {
        LSF_BACKEND
    }

    fn validate(&self, spec: &SubmissionSpec) -> SchedResult<()> {
        if !spec.dependencies().is_empty() {
            return Err(Self::unsupported(format!(
                "job {} declares dependencies; LSF has no native dependency support",
                spec.name()
            )));
        }
        Ok(())
    }

    async fn dispatch(&self, target: DispatchTarget<'_>) -> SchedResult<Vec<JobHandle>> {
        async move {
            match target {
                DispatchTarget::Spec(spec) | DispatchTarget::Node { spec, .. } => {
                    self.validate(spec)?;
                    Ok(vec![self.submit(spec, target.task_label()).await?])
                }
                DispatchTarget::Graph(graph) => {
                    if graph.has_edges() {
                        return Err(Self::unsupported(format!(
                            "graph {} has dependency edges; dispatch it sequentially instead",
                            graph.label()
                        )));
                    }
                    let mut handles = Vec::with_capacity(graph.len());
                    for spec in graph.topological_order() {
                        handles.push(self.submit(spec, graph.label()).await?);
                    }
                    Ok(handles)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn get_status(&self, handle: &JobHandle) -> SchedResult<ActiveJobInfo> {
        self.status(handle).instrument(self.span.clone()).await
    }

    async fn wait(&self, handle: &JobHandle, policy: &WaitPolicy) -> SchedResult<WaitOutcome> {
        let target = format!("{} ({})", handle.name, handle.id);
        poll_loop(policy, &target, true, |_| self.poll(handle))
            .instrument(self.span.clone())
            .await
    }

    async fn kill(&self, handle: &JobHandle) -> SchedResult<()> {
        async move {
            let program = self.config.executables.bkill.clone();
            let output = self
                .run(Invocation::new([program.clone(), handle.id.query_id()]))
                .await?;
            if !output.success() {
                return Err(SchedError::CommandError {
                    command: program,
                    message: output.to_string(),
                });
            }
            info!(id = %handle.id, "Kill requested");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn list_jobs(&self) -> SchedResult<Vec<ActiveJobInfo>> {
        self.bjobs(None).instrument(self.span.clone()).await
    }

    async fn fetch_logs(&self, handle: &JobHandle) -> SchedResult<JobLogs> {
        self.collect_logs(handle)
            .instrument(self.span.clone())
            .await
    }
}
