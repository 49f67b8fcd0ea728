//! Backend abstraction shared by all batch systems.
//!
//! Every batch system implements [`BatchBackend`]: queue a job description,
//! dispatch a spec or a whole graph, poll and wait, kill, list and fetch
//! logs. Native state strings are normalized into [`JobState`]; native
//! identifiers are surfaced verbatim through [`JobId`].

mod wait;

pub(crate) use wait::{Poll, poll_loop};

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CommandOutput, SchedError, SchedResult};
use crate::graph::DependencyGraph;
use crate::spec::{CommandToken, SubmissionSpec, tokenize};

/// Auxiliary handle key: the per-submission log file.
pub const AUX_USER_LOG: &str = "userLog";
/// Auxiliary handle key: the generated submission description.
pub const AUX_SUBMISSION_FILE: &str = "submissionFile";
/// Auxiliary handle key: the generated DAG file.
pub const AUX_DAG_FILE: &str = "dagFile";
/// Auxiliary handle key: standard output path (native macros unexpanded).
pub const AUX_STDOUT: &str = "stdout";
/// Auxiliary handle key: standard error path (native macros unexpanded).
pub const AUX_STDERR: &str = "stderr";
/// Auxiliary handle key: queue the job was submitted to.
pub const AUX_QUEUE: &str = "queue";

/// HTCondor-style `cluster.proc` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterProc {
    pub cluster: u64,
    pub proc_id: u32,
}

impl ClusterProc {
    pub fn new(cluster: u64, proc_id: u32) -> Self {
        Self { cluster, proc_id }
    }

    /// Parse `"745.3"`.
    pub fn parse(s: &str) -> Option<Self> {
        let (cluster, proc_id) = s.trim().split_once('.')?;
        Some(Self {
            cluster: cluster.parse().ok()?,
            proc_id: proc_id.parse().ok()?,
        })
    }
}

impl fmt::Display for ClusterProc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.cluster, self.proc_id)
    }
}

/// Backend-native job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobId {
    /// One job.
    Single(ClusterProc),
    /// A contiguous range of jobs from one submission.
    Range { begin: ClusterProc, end: ClusterProc },
    /// Opaque backend token (e.g. an LSF job id).
    Token(String),
}

impl JobId {
    /// Parse a native identifier as printed by [`fmt::Display`].
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if let Some((begin, end)) = s.split_once('-') {
            if let (Some(begin), Some(end)) = (ClusterProc::parse(begin), ClusterProc::parse(end)) {
                return JobId::range(begin, end);
            }
        }
        match ClusterProc::parse(s) {
            Some(single) => JobId::Single(single),
            None => JobId::Token(s.to_string()),
        }
    }

    /// Build from range ends, collapsing equal ends into a single job.
    pub fn range(begin: ClusterProc, end: ClusterProc) -> Self {
        if begin == end {
            JobId::Single(begin)
        } else {
            JobId::Range { begin, end }
        }
    }

    /// Number of jobs, when the identifier tells.
    pub fn job_count(&self) -> Option<u64> {
        match self {
            JobId::Single(_) => Some(1),
            JobId::Range { begin, end } if begin.cluster == end.cluster => {
                Some(u64::from(end.proc_id.saturating_sub(begin.proc_id)) + 1)
            }
            JobId::Range { .. } | JobId::Token(_) => None,
        }
    }

    /// Identifier handed to query and removal tools.
    pub fn query_id(&self) -> String {
        match self {
            JobId::Single(single) => single.to_string(),
            JobId::Range { begin, .. } => begin.cluster.to_string(),
            JobId::Token(token) => token.clone(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobId::Single(single) => write!(f, "{single}"),
            JobId::Range { begin, end } => write!(f, "{begin} - {end}"),
            JobId::Token(token) => write!(f, "{token}"),
        }
    }
}

/// Result of a dispatch, needed for later queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    /// Backend type that produced the handle.
    pub backend: String,
    /// Job (or pipeline) name.
    pub name: String,
    /// Native identifier.
    pub id: JobId,
    /// Backend-specific details such as the log file path.
    pub auxiliary: BTreeMap<String, String>,
}

impl JobHandle {
    pub fn new(backend: impl Into<String>, name: impl Into<String>, id: JobId) -> Self {
        Self {
            backend: backend.into(),
            name: name.into(),
            id,
            auxiliary: BTreeMap::new(),
        }
    }

    /// Rebuild a handle from an identifier typed by an operator.
    pub fn from_native(backend: impl Into<String>, id: &str) -> Self {
        Self::new(backend, id, JobId::parse(id))
    }

    /// Attach an auxiliary value.
    pub fn with_aux(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.auxiliary.insert(key.into(), value.into());
        self
    }

    /// Look up an auxiliary value.
    pub fn aux(&self, key: &str) -> Option<&str> {
        self.auxiliary.get(key).map(String::as_str)
    }
}

/// Normalized job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Done,
    Failed,
    Unknown,
}

impl JobState {
    /// Whether waiting should keep polling.
    pub fn is_pollable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Running | JobState::Suspended)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }

    /// Check if this represents a successful completion.
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Done)
    }

    /// Get the state name.
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Suspended => "suspended",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        }
    }

    /// Combine member states of an array or cluster.
    pub fn aggregate<I: IntoIterator<Item = JobState>>(states: I) -> JobState {
        let states: Vec<JobState> = states.into_iter().collect();
        let any = |s: JobState| states.contains(&s);
        if states.is_empty() {
            JobState::Unknown
        } else if any(JobState::Running) {
            JobState::Running
        } else if any(JobState::Pending) {
            JobState::Pending
        } else if any(JobState::Suspended) {
            JobState::Suspended
        } else if any(JobState::Failed) {
            JobState::Failed
        } else if any(JobState::Unknown) {
            JobState::Unknown
        } else {
            JobState::Done
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line of a backend job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveJobInfo {
    /// Native identifier, verbatim.
    pub id: String,
    pub name: Option<String>,
    pub state: JobState,
    /// Native state string, verbatim.
    pub native_state: String,
    pub queue: Option<String>,
    pub user: Option<String>,
    pub exec_hosts: Vec<String>,
    pub submitted: Option<String>,
}

impl ActiveJobInfo {
    /// Summarize the members of an array under one identifier.
    pub fn aggregate(id: &str, members: &[ActiveJobInfo]) -> Option<ActiveJobInfo> {
        let first = members.first()?;
        let state = JobState::aggregate(members.iter().map(|m| m.state));
        let mut native: Vec<&str> = members.iter().map(|m| m.native_state.as_str()).collect();
        native.sort_unstable();
        native.dedup();
        Some(ActiveJobInfo {
            id: id.to_string(),
            state,
            native_state: native.join(","),
            ..first.clone()
        })
    }
}

/// Captured job logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobLogs {
    pub stdout: String,
    pub stderr: String,
}

/// How long and how often to wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Polling attempts; `None` means unlimited.
    pub max_attempts: Option<u32>,
    /// Fixed interval between attempts.
    pub interval: Duration,
    /// Log every attempt at info level.
    pub report: bool,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            interval: Duration::from_secs(60),
            report: false,
        }
    }
}

impl WaitPolicy {
    /// Policy with a bounded number of attempts.
    pub fn attempts(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            interval,
            report: false,
        }
    }

    /// Enable per-attempt reporting.
    pub fn reporting(mut self) -> Self {
        self.report = true;
        self
    }
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitOutcome {
    /// The job left the pollable states.
    Finished(JobState),
    /// The attempts budget ran out.
    GaveUp { attempts: u32 },
    /// The job disappeared from the listing before a terminal state was seen.
    Vanished { attempts: u32 },
}

impl WaitOutcome {
    /// Whether the job finished successfully.
    pub fn is_done(&self) -> bool {
        matches!(self, WaitOutcome::Finished(JobState::Done))
    }
}

/// Command given to [`BatchBackend::queue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueCommand {
    /// Already tokenized command.
    Tokens(Vec<CommandToken>),
    /// Command line subject to shell tokenization.
    Line(String),
    /// No command; the inline script is submitted instead.
    None,
}

/// Arguments of [`BatchBackend::queue`].
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub name: String,
    pub command: QueueCommand,
    pub stdin_script: Option<String>,
    pub process_count: u32,
    pub min_success: Option<u32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub backend_arguments: BTreeMap<String, String>,
    pub dependencies: Vec<Arc<SubmissionSpec>>,
}

impl QueueRequest {
    /// Request with a single process and no extras.
    pub fn new(name: impl Into<String>, command: QueueCommand) -> Self {
        Self {
            name: name.into(),
            command,
            stdin_script: None,
            process_count: 1,
            min_success: None,
            stdout: None,
            stderr: None,
            backend_arguments: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Validate into a spec.
    pub fn build(self) -> SchedResult<SubmissionSpec> {
        let tokens = match self.command {
            QueueCommand::Tokens(tokens) => tokens,
            QueueCommand::Line(line) => tokenize(&line)?,
            QueueCommand::None => Vec::new(),
        };
        let mut builder = SubmissionSpec::builder(self.name)
            .command(tokens)
            .process_count(self.process_count)
            .backend_arguments(self.backend_arguments);
        if let Some(script) = self.stdin_script {
            builder = builder.stdin_script(script);
        }
        if let Some(min_success) = self.min_success {
            builder = builder.min_success(min_success);
        }
        if let Some(stdout) = self.stdout {
            builder = builder.stdout(stdout);
        }
        if let Some(stderr) = self.stderr {
            builder = builder.stderr(stderr);
        }
        for dep in self.dependencies {
            builder = builder.depends_on(dep);
        }
        builder.build()
    }
}

/// What to dispatch.
#[derive(Debug, Clone, Copy)]
pub enum DispatchTarget<'a> {
    /// One spec, with its dependency closure if it has any.
    Spec(&'a Arc<SubmissionSpec>),
    /// One node of a larger graph, reporting to the graph's monitoring task.
    Node {
        spec: &'a Arc<SubmissionSpec>,
        task: &'a str,
    },
    /// A whole graph.
    Graph(&'a DependencyGraph),
}

impl DispatchTarget<'_> {
    /// Label of the monitoring task the dispatched jobs report to.
    pub fn task_label(&self) -> &str {
        match self {
            DispatchTarget::Spec(spec) => spec.name(),
            DispatchTarget::Node { task, .. } => task,
            DispatchTarget::Graph(graph) => graph.label(),
        }
    }
}

/// Capability set every batch system implements.
#[async_trait]
pub trait BatchBackend: Send + Sync {
    /// Backend type name (e.g. `"HTCondor"`).
    fn backend_type(&self) -> &'static str;

    /// Backend-specific checks on a built spec.
    fn validate(&self, _spec: &SubmissionSpec) -> SchedResult<()> {
        Ok(())
    }

    /// Validate a job description without contacting the cluster.
    fn queue(&self, request: QueueRequest) -> SchedResult<Arc<SubmissionSpec>> {
        let spec = request.build()?;
        self.validate(&spec)?;
        Ok(Arc::new(spec))
    }

    /// Compile and submit.
    async fn dispatch(&self, target: DispatchTarget<'_>) -> SchedResult<Vec<JobHandle>>;

    /// Poll the current state.
    async fn get_status(&self, handle: &JobHandle) -> SchedResult<ActiveJobInfo>;

    /// Block until the job leaves the pollable states or the budget runs out.
    async fn wait(&self, handle: &JobHandle, policy: &WaitPolicy) -> SchedResult<WaitOutcome>;

    /// Request removal. Fire-and-forget; poll afterwards to confirm.
    async fn kill(&self, handle: &JobHandle) -> SchedResult<()>;

    /// List the current user's jobs.
    async fn list_jobs(&self) -> SchedResult<Vec<ActiveJobInfo>>;

    /// Read the captured output of a job.
    async fn fetch_logs(&self, handle: &JobHandle) -> SchedResult<JobLogs>;
}

/// Dispatch a graph one node at a time, waiting for each to finish.
///
/// For backends without native dependency support. Stops at the first node
/// that does not finish successfully.
pub async fn dispatch_sequentially(
    backend: &dyn BatchBackend,
    graph: &DependencyGraph,
    policy: &WaitPolicy,
) -> SchedResult<Vec<JobHandle>> {
    let mut handles = Vec::with_capacity(graph.len());
    for spec in graph.topological_order() {
        let detached = spec.without_dependencies();
        let target = DispatchTarget::Node {
            spec: &detached,
            task: graph.label(),
        };
        let dispatched = backend.dispatch(target).await?;
        for handle in dispatched {
            info!(job = %handle.name, id = %handle.id, "Waiting before dispatching dependents");
            let outcome = backend.wait(&handle, policy).await?;
            if !outcome.is_done() {
                return Err(SchedError::submission(
                    format!(
                        "job {} ({}) did not complete: {:?}; dependents not dispatched",
                        handle.name, handle.id, outcome
                    ),
                    CommandOutput::default(),
                ));
            }
            handles.push(handle);
        }
    }
    Ok(handles)
}

/// Substitute `{name}` macros in a path template.
pub fn expand_macros(template: &str, macros: &[(&str, &str)]) -> String {
    macros
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), value)
        })
}

/// Path of a generated artifact: `<dir>/<name>[.<tag>].<ext>`.
///
/// Derived deterministically so that re-submitting a pipeline lands on the
/// same files while distinct tags never collide.
pub fn artifact_path(dir: &Path, name: &str, tag: Option<&str>, ext: &str) -> PathBuf {
    let stem = match tag {
        Some(tag) if !tag.is_empty() => format!("{name}.{tag}"),
        _ => name.to_string(),
    };
    dir.join(format!("{stem}.{ext}"))
}

/// Write a generated artifact, replacing (with a warning) any previous one.
pub(crate) async fn write_artifact(path: &Path, content: &str) -> SchedResult<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        warn!(path = %path.display(), "Overwriting existing artifact");
    } else if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Mark a generated script executable.
#[cfg(unix)]
pub(crate) async fn make_executable(path: &Path) -> SchedResult<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) async fn make_executable(_path: &Path) -> SchedResult<()> {
    Ok(())
}

/// Read a captured log file.
pub(crate) async fn read_log(path: &Path) -> SchedResult<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        SchedError::IoError(std::io::Error::new(
            e.kind(),
            format!("{}: {e}", path.display()),
        ))
    })
}
