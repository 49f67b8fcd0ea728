//! HTCondor adapter for job and DAG submission.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::backend::{
    AUX_DAG_FILE, AUX_STDERR, AUX_STDOUT, AUX_SUBMISSION_FILE, AUX_USER_LOG, ActiveJobInfo,
    BatchBackend, ClusterProc, DispatchTarget, JobHandle, JobId, JobLogs, JobState, Poll,
    WaitOutcome, WaitPolicy, artifact_path, make_executable, poll_loop, read_log, write_artifact,
};
use crate::error::{CommandOutput, SchedError, SchedResult};
use crate::graph::DependencyGraph;
use crate::htcondor::parser::{self, WaitReply};
use crate::htcondor::templates::{self, CompileContext, CompiledJob};
use crate::monitoring::MonitoringEnv;
use crate::process::{Invocation, ProcessRunner};
use crate::spec::SubmissionSpec;

/// Backend type name.
pub const HTCONDOR_BACKEND: &str = "HTCondor";

/// Paths of the HTCondor command-line tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HtCondorExecutables {
    pub condor_submit: String,
    pub condor_submit_dag: String,
    pub condor_wait: String,
    pub condor_q: String,
    pub condor_history: String,
    pub condor_rm: String,
}

impl Default for HtCondorExecutables {
    fn default() -> Self {
        Self {
            condor_submit: "condor_submit".to_string(),
            condor_submit_dag: "condor_submit_dag".to_string(),
            condor_wait: "condor_wait".to_string(),
            condor_q: "condor_q".to_string(),
            condor_history: "condor_history".to_string(),
            condor_rm: "condor_rm".to_string(),
        }
    }
}

/// Configuration for the HTCondor adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HtCondorConfig {
    /// Tool paths.
    pub executables: HtCondorExecutables,

    /// Entries written at the top of every submit description.
    pub submit_defaults: BTreeMap<String, String>,

    /// Directory for submit descriptions, DAG files and default logs.
    pub work_dir: PathBuf,

    /// Tag distinguishing concurrent submissions of the same pipeline.
    pub submission_tag: Option<String>,

    /// Environment variable carrying the job index.
    pub job_index_var: String,

    /// Monitoring service URL handed to the jobs.
    pub monitoring_url: Option<String>,

    /// Monitoring API prefix handed to the jobs; the server default when absent.
    pub monitoring_prefix: Option<String>,

    /// Time budget of a single command, in seconds.
    pub command_timeout_secs: u64,
}

impl Default for HtCondorConfig {
    fn default() -> Self {
        Self {
            executables: HtCondorExecutables::default(),
            submit_defaults: BTreeMap::from([
                ("universe".to_string(), "vanilla".to_string()),
                ("should_transfer_files".to_string(), "YES".to_string()),
                ("when_to_transfer_output".to_string(), "ON_EXIT".to_string()),
            ]),
            work_dir: PathBuf::from("/tmp/farmhand-jobs"),
            submission_tag: None,
            job_index_var: "HTCONDOR_JOBINDEX".to_string(),
            monitoring_url: None,
            monitoring_prefix: None,
            command_timeout_secs: 30,
        }
    }
}

/// Adapter for the HTCondor batch system.
pub struct HtCondorAdapter {
    config: HtCondorConfig,
    runner: Arc<dyn ProcessRunner>,
    span: Span,
}

impl HtCondorAdapter {
    /// Create an adapter running commands through `runner`.
    pub fn new(config: HtCondorConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            config,
            runner,
            span: info_span!("htcondor"),
        }
    }

    /// Log under the given span instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &HtCondorConfig {
        &self.config
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.command_timeout_secs)
    }

    fn tag(&self) -> Option<&str> {
        self.config.submission_tag.as_deref()
    }

    async fn run<I, S>(&self, argv: I) -> SchedResult<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let invocation = Invocation::new(argv).with_timeout(self.command_timeout());
        self.run_invocation(invocation).await
    }

    async fn run_invocation(&self, invocation: Invocation) -> SchedResult<CommandOutput> {
        debug!(command = %invocation.display(), "Running HTCondor command");
        let output = self.runner.run(&invocation).await?;
        debug!(command = invocation.program(), rc = ?output.exit_code, "HTCondor command finished");
        Ok(output)
    }

    fn compile(&self, spec: &SubmissionSpec, task_label: &str) -> SchedResult<CompiledJob> {
        let ctx = CompileContext {
            work_dir: &self.config.work_dir,
            tag: self.tag(),
            defaults: &self.config.submit_defaults,
            job_index_var: &self.config.job_index_var,
            monitoring: self.config.monitoring_url.as_ref().map(|url| MonitoringEnv {
                url: url.clone(),
                api_prefix: self.config.monitoring_prefix.clone(),
                task_label: task_label.to_string(),
            }),
        };
        templates::compile_description(spec, &ctx)
    }

    async fn write_job(&self, spec: &SubmissionSpec, task_label: &str) -> SchedResult<CompiledJob> {
        let job = self.compile(spec, task_label)?;
        if let Some((path, body)) = &job.script {
            write_artifact(path, body).await?;
            make_executable(path).await?;
        }
        write_artifact(&job.submission_path, &job.description.render()).await?;
        Ok(job)
    }

    async fn submit_single(&self, spec: &SubmissionSpec, task_label: &str) -> SchedResult<JobHandle> {
        let job = self.write_job(spec, task_label).await?;
        let submission = job.submission_path.display().to_string();

        let output = self
            .run([
                self.config.executables.condor_submit.clone(),
                "-terse".to_string(),
                "-batch-name".to_string(),
                spec.name().to_string(),
                submission.clone(),
            ])
            .await?;
        if !output.success() {
            return Err(SchedError::submission(
                format!("condor_submit exited with {:?}", output.exit_code),
                output,
            ));
        }
        let id = parser::parse_submit_output(&output)?;
        match &id {
            JobId::Range { begin, end } => {
                info!(job = spec.name(), %begin, %end, "Multiple HTCondor jobs submitted")
            }
            _ => info!(job = spec.name(), id = %id, "Single HTCondor job submitted"),
        }

        Ok(JobHandle::new(HTCONDOR_BACKEND, spec.name(), id)
            .with_aux(AUX_USER_LOG, job.user_log.display().to_string())
            .with_aux(AUX_SUBMISSION_FILE, submission)
            .with_aux(AUX_STDOUT, job.stdout)
            .with_aux(AUX_STDERR, job.stderr))
    }

    async fn submit_dag(&self, graph: &DependencyGraph) -> SchedResult<JobHandle> {
        let label = graph.label();
        let mut paths = FxHashMap::default();
        for spec in graph.topological_order() {
            let job = self.write_job(spec, label).await?;
            paths.insert(spec.name().to_string(), job.submission_path);
        }

        let dag_path = artifact_path(&self.config.work_dir, label, self.tag(), "dag");
        write_artifact(&dag_path, &templates::render_dag(graph, &paths)?).await?;
        let dag_file = dag_path.display().to_string();

        let output = self
            .run([
                self.config.executables.condor_submit_dag.clone(),
                "-force".to_string(),
                "-batch-name".to_string(),
                label.to_string(),
                dag_file.clone(),
            ])
            .await?;
        if !output.success() {
            return Err(SchedError::submission(
                format!("condor_submit_dag exited with {:?}", output.exit_code),
                output,
            ));
        }
        let reply = parser::parse_dag_submit_output(&output)?;
        info!(
            label,
            cluster = reply.cluster,
            nodes = graph.len(),
            "DAG submitted to HTCondor"
        );

        let described = |key: &str, fallback: &str| {
            reply
                .descriptions
                .get(key)
                .cloned()
                .unwrap_or_else(|| format!("{dag_file}.{fallback}"))
        };
        Ok(JobHandle::new(
            HTCONDOR_BACKEND,
            label,
            JobId::Single(ClusterProc::new(reply.cluster, 0)),
        )
        .with_aux(AUX_USER_LOG, described(parser::DAGMAN_LOG, "dagman.log"))
        .with_aux(AUX_STDOUT, described(parser::DAGMAN_OUT, "dagman.out"))
        .with_aux(AUX_STDERR, described(parser::DAGMAN_LIB_ERR, "lib.err"))
        .with_aux(AUX_DAG_FILE, dag_file))
    }

    async fn listing(&self, program: &str, args: &[String]) -> SchedResult<Vec<ActiveJobInfo>> {
        let mut argv = vec![program.to_string()];
        argv.extend(args.iter().cloned());
        let output = self.run(argv).await?;
        if !output.success() {
            return Err(SchedError::listing(
                format!("{program} exited with {:?}", output.exit_code),
                output,
            ));
        }
        Ok(parser::parse_listing_output(&output.stdout))
    }

    async fn status(&self, handle: &JobHandle) -> SchedResult<ActiveJobInfo> {
        let query = handle.id.query_id();
        let executables = &self.config.executables;

        let mut rows: Vec<ActiveJobInfo> = self
            .listing(&executables.condor_q, &["-nobatch".to_string(), query.clone()])
            .await?
            .into_iter()
            .filter(|row| parser::listing_matches(&handle.id, &row.id))
            .collect();
        if rows.is_empty() {
            debug!(id = %handle.id, "Job left the queue; consulting history");
            rows = self
                .listing(&executables.condor_history, std::slice::from_ref(&query))
                .await?
                .into_iter()
                .filter(|row| parser::listing_matches(&handle.id, &row.id))
                .collect();
        }

        match (&handle.id, rows.len()) {
            (_, 0) => Err(SchedError::JobNotFound(handle.id.to_string())),
            (JobId::Single(_), _) => Ok(rows.swap_remove(0)),
            _ => ActiveJobInfo::aggregate(&handle.id.to_string(), &rows)
                .ok_or_else(|| SchedError::JobNotFound(handle.id.to_string())),
        }
    }

    async fn wait_on_log(&self, handle: &JobHandle, policy: &WaitPolicy) -> SchedResult<WaitOutcome> {
        let user_log = handle.aux(AUX_USER_LOG).ok_or_else(|| {
            SchedError::InvalidCommand(format!("handle {} carries no user log", handle.id))
        })?;

        let mut argv = vec![
            self.config.executables.condor_wait.clone(),
            "-wait".to_string(),
            policy.interval.as_secs().to_string(),
            user_log.to_string(),
        ];
        // Without an id condor_wait waits for every job in the log.
        if let JobId::Single(single) = &handle.id {
            argv.push(single.to_string());
        }
        let invocation = Invocation::new(argv).with_timeout(policy.interval + self.command_timeout());
        let target = format!("{} ({})", handle.name, handle.id);

        poll_loop(policy, &target, false, |_| {
            let invocation = invocation.clone();
            async move {
                let output = self.run_invocation(invocation).await?;
                match parser::classify_wait_output(&output) {
                    WaitReply::Completed => match self.status(handle).await {
                        Ok(info) if !info.state.is_pollable() => Ok(Poll::Settled(info.state)),
                        Ok(info) => {
                            warn!(id = %handle.id, state = %info.state, "Queue still lists a completed job");
                            Ok(Poll::Settled(JobState::Unknown))
                        }
                        Err(e) => {
                            warn!(id = %handle.id, error = %e, "Could not resolve final state");
                            Ok(Poll::Settled(JobState::Unknown))
                        }
                    },
                    WaitReply::TimeExpired => Ok(Poll::Waiting(JobState::Unknown)),
                    WaitReply::Failed => Err(SchedError::submission(
                        format!("condor_wait exited with {:?}", output.exit_code),
                        output,
                    )),
                }
            }
        })
        .await
    }

    fn expanded_paths(template: &str, id: &JobId) -> Vec<String> {
        let procs: Vec<(String, String)> = match id {
            JobId::Single(single) => vec![(single.cluster.to_string(), single.proc_id.to_string())],
            JobId::Range { begin, end } => (begin.proc_id..=end.proc_id)
                .map(|p| (begin.cluster.to_string(), p.to_string()))
                .collect(),
            JobId::Token(token) => vec![(token.clone(), "0".to_string())],
        };
        let mut paths: Vec<String> = procs
            .into_iter()
            .map(|(cluster, proc_id)| {
                template
                    .replace("$(Cluster)", &cluster)
                    .replace("$(ClusterId)", &cluster)
                    .replace("$(Process)", &proc_id)
                    .replace("$(ProcId)", &proc_id)
            })
            .collect();
        paths.dedup();
        paths
    }

    async fn read_logs(template: &str, id: &JobId) -> SchedResult<String> {
        let paths = Self::expanded_paths(template, id);
        if let [single] = paths.as_slice() {
            return read_log(Path::new(single)).await;
        }
        let mut text = String::new();
        for path in paths {
            text.push_str(&format!("==> {path} <==\n"));
            text.push_str(&read_log(Path::new(&path)).await?);
        }
        Ok(text)
    }
}

#[async_trait]
impl BatchBackend for HtCondorAdapter {
    fn backend_type(&self) -> &'static str {
        HTCONDOR_BACKEND
    }

    fn validate(&self, spec: &SubmissionSpec) -> SchedResult<()> {
        match spec.command().first() {
            Some(token) if token.as_single().is_none() => Err(SchedError::InvalidCommand(format!(
                "job {}: the executable cannot be a list of alternatives",
                spec.name()
            ))),
            _ => Ok(()),
        }
    }

    async fn dispatch(&self, target: DispatchTarget<'_>) -> SchedResult<Vec<JobHandle>> {
        async move {
            match target {
                DispatchTarget::Spec(spec) | DispatchTarget::Node { spec, .. } => {
                    let task = target.task_label();
                    if spec.dependencies().is_empty() {
                        return Ok(vec![self.submit_single(spec, task).await?]);
                    }
                    let graph = DependencyGraph::from_roots(task, [Arc::clone(spec)])?;
                    Ok(vec![self.submit_dag(&graph).await?])
                }
                DispatchTarget::Graph(graph) if graph.is_empty() => Err(SchedError::InvalidGraph(
                    format!("graph {} has no jobs", graph.label()),
                )),
                DispatchTarget::Graph(graph) if graph.len() == 1 => {
                    let only = graph.nodes().next().ok_or_else(|| {
                        SchedError::InvalidGraph(format!("graph {} has no jobs", graph.label()))
                    })?;
                    Ok(vec![self.submit_single(only, graph.label()).await?])
                }
                DispatchTarget::Graph(graph) => Ok(vec![self.submit_dag(graph).await?]),
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn get_status(&self, handle: &JobHandle) -> SchedResult<ActiveJobInfo> {
        self.status(handle).instrument(self.span.clone()).await
    }

    async fn wait(&self, handle: &JobHandle, policy: &WaitPolicy) -> SchedResult<WaitOutcome> {
        self.wait_on_log(handle, policy)
            .instrument(self.span.clone())
            .await
    }

    async fn kill(&self, handle: &JobHandle) -> SchedResult<()> {
        async move {
            let program = &self.config.executables.condor_rm;
            let output = self.run([program.clone(), handle.id.query_id()]).await?;
            if !output.success() {
                return Err(SchedError::CommandError {
                    command: program.clone(),
                    message: output.to_string(),
                });
            }
            info!(id = %handle.id, "Removal requested");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    async fn list_jobs(&self) -> SchedResult<Vec<ActiveJobInfo>> {
        self.listing(&self.config.executables.condor_q, &["-nobatch".to_string()])
            .instrument(self.span.clone())
            .await
    }

    async fn fetch_logs(&self, handle: &JobHandle) -> SchedResult<JobLogs> {
        let missing = |key: &str| {
            SchedError::InvalidCommand(format!("handle {} records no {key} path", handle.id))
        };
        let stdout = handle.aux(AUX_STDOUT).ok_or_else(|| missing(AUX_STDOUT))?;
        let stderr = handle.aux(AUX_STDERR).ok_or_else(|| missing(AUX_STDERR))?;
        Ok(JobLogs {
            stdout: Self::read_logs(stdout, &handle.id).await?,
            stderr: Self::read_logs(stderr, &handle.id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ScriptedRunner;

    fn adapter(runner: Arc<ScriptedRunner>, work_dir: &std::path::Path) -> HtCondorAdapter {
        let config = HtCondorConfig {
            work_dir: work_dir.to_path_buf(),
            ..Default::default()
        };
        HtCondorAdapter::new(config, runner)
    }

    #[test]
    fn test_default_config() {
        let config = HtCondorConfig::default();
        assert_eq!(config.job_index_var, "HTCONDOR_JOBINDEX");
        assert_eq!(config.submit_defaults.len(), 3);
        assert_eq!(config.command_timeout_secs, 30);
    }

    #[test]
    fn test_expanded_paths() {
        let range = JobId::range(ClusterProc::new(7, 0), ClusterProc::new(7, 2));
        let paths = HtCondorAdapter::expanded_paths("/w/x.$(Cluster).$(Process).out", &range);
        assert_eq!(paths, vec!["/w/x.7.0.out", "/w/x.7.1.out", "/w/x.7.2.out"]);

        let dag = HtCondorAdapter::expanded_paths("/w/p.dag.dagman.out", &range);
        assert_eq!(dag, vec!["/w/p.dag.dagman.out"]);
    }

    #[tokio::test]
    async fn test_submit_single_job() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("745.0 - 745.0\n", "", 0);
        let adapter = adapter(Arc::clone(&runner), dir.path());

        let spec = SubmissionSpec::builder("hello")
            .command_line("/bin/echo hi")
            .build_shared()
            .unwrap();
        let handles = adapter.dispatch(DispatchTarget::Spec(&spec)).await.unwrap();

        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].id, JobId::Single(ClusterProc::new(745, 0)));
        let sub = dir.path().join("hello.sub");
        assert_eq!(handles[0].aux(AUX_SUBMISSION_FILE), Some(sub.to_str().unwrap()));
        let text = std::fs::read_to_string(&sub).unwrap();
        assert!(text.contains("executable = /bin/echo\n"));

        let argv = &runner.invocations()[0].argv;
        assert_eq!(argv[0], "condor_submit");
        assert_eq!(argv[1..4], ["-terse", "-batch-name", "hello"]);
    }

    fn monitored(runner: Arc<ScriptedRunner>, work_dir: &std::path::Path) -> HtCondorAdapter {
        let config = HtCondorConfig {
            work_dir: work_dir.to_path_buf(),
            monitoring_url: Some("http://mon:5000".to_string()),
            ..Default::default()
        };
        HtCondorAdapter::new(config, runner)
    }

    #[tokio::test]
    async fn test_single_node_graph_reports_to_graph_task() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("81.0 - 81.0\n", "", 0);
        let adapter = monitored(Arc::clone(&runner), dir.path());

        let sim = SubmissionSpec::builder("sim")
            .command_line("sim.sh")
            .build_shared()
            .unwrap();
        let graph = DependencyGraph::from_roots("mc", [sim]).unwrap();
        adapter.dispatch(DispatchTarget::Graph(&graph)).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("sim.sub")).unwrap();
        assert!(text.contains(
            "environment = \"HTCONDOR_JOBINDEX=SINGLE FARMHAND_MONITORING_URL=http://mon:5000 \
             FARMHAND_TASK_LABEL=mc FARMHAND_PROCESS=sim\"\n"
        ));
    }

    #[tokio::test]
    async fn test_graph_node_reports_to_enclosing_task() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("82.0 - 82.0\n", "", 0);
        let adapter = monitored(Arc::clone(&runner), dir.path());

        let spec = SubmissionSpec::builder("b")
            .command_line("b.sh")
            .build_shared()
            .unwrap();
        let target = DispatchTarget::Node {
            spec: &spec,
            task: "pipe",
        };
        adapter.dispatch(target).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("b.sub")).unwrap();
        assert!(text.contains("FARMHAND_TASK_LABEL=pipe FARMHAND_PROCESS=b"));
        assert_eq!(runner.invocations()[0].argv[3], "b");
    }

    #[tokio::test]
    async fn test_standalone_spec_reports_to_own_task() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("83.0 - 83.0\n", "", 0);
        let config = HtCondorConfig {
            work_dir: dir.path().to_path_buf(),
            monitoring_url: Some("http://mon:5000".to_string()),
            monitoring_prefix: Some("/farm/v0".to_string()),
            ..Default::default()
        };
        let adapter = HtCondorAdapter::new(config, Arc::clone(&runner) as Arc<dyn ProcessRunner>);

        let spec = SubmissionSpec::builder("hello")
            .command_line("hello.sh")
            .build_shared()
            .unwrap();
        adapter.dispatch(DispatchTarget::Spec(&spec)).await.unwrap();

        let text = std::fs::read_to_string(dir.path().join("hello.sub")).unwrap();
        assert!(text.contains(
            "FARMHAND_MONITORING_PREFIX=/farm/v0 FARMHAND_TASK_LABEL=hello FARMHAND_PROCESS=hello"
        ));
    }

    #[tokio::test]
    async fn test_submit_failure_keeps_output() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("", "ERROR: Failed to parse", 1);
        let adapter = adapter(Arc::clone(&runner), dir.path());

        let spec = SubmissionSpec::builder("bad")
            .command_line("run.sh")
            .build_shared()
            .unwrap();
        let err = adapter.dispatch(DispatchTarget::Spec(&spec)).await.unwrap_err();
        let output = err.output().unwrap();
        assert_eq!(output.exit_code, Some(1));
        assert_eq!(output.stderr, "ERROR: Failed to parse");
    }

    #[tokio::test]
    async fn test_status_falls_back_to_history() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push_reply(" ID OWNER SUBMITTED RUN_TIME ST PRI SIZE CMD\n", "", 0)
            .push_reply(
                " ID OWNER SUBMITTED RUN_TIME ST COMPLETED CMD\n\
                 9.0 alice 10/20 18:15 0+00:01:00 C 10/20 18:16 run.sh\n",
                "",
                0,
            );
        let adapter = adapter(Arc::clone(&runner), dir.path());

        let handle = JobHandle::from_native(HTCONDOR_BACKEND, "9.0");
        let info = adapter.get_status(&handle).await.unwrap();
        assert_eq!(info.state, JobState::Done);
        assert_eq!(runner.invocations()[1].argv[0], "condor_history");
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("", "", 0).push_reply("", "", 0);
        let adapter = adapter(Arc::clone(&runner), dir.path());

        let handle = JobHandle::from_native(HTCONDOR_BACKEND, "9.0");
        assert!(matches!(
            adapter.get_status(&handle).await,
            Err(SchedError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_reply("", "Couldn't find/remove all jobs", 1);
        let adapter = adapter(Arc::clone(&runner), dir.path());

        let handle = JobHandle::from_native(HTCONDOR_BACKEND, "9.0");
        let err = adapter.kill(&handle).await.unwrap_err();
        assert!(err.to_string().contains("Couldn't find/remove"));
        assert_eq!(runner.invocations()[0].argv, vec!["condor_rm", "9.0"]);
    }
}
