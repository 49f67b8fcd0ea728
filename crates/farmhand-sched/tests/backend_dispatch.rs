//! End-to-end adapter scenarios against a scripted process runner.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use farmhand_sched::backend::{AUX_DAG_FILE, AUX_USER_LOG};
use farmhand_sched::{
    BackendRegistry, BackendSettings, BatchBackend, ClusterProc, DependencyGraph, DispatchTarget,
    HtCondorAdapter, HtCondorConfig, JobId, JobState, LsfAdapter, LsfConfig, SchedError,
    ScriptedRunner, SubmissionSpec, WaitOutcome, WaitPolicy, dispatch_sequentially,
};

fn diamond(label: &str) -> DependencyGraph {
    let a = SubmissionSpec::builder("a").command_line("a.sh").build_shared().unwrap();
    let b = SubmissionSpec::builder("b")
        .command_line("b.sh")
        .depends_on(Arc::clone(&a))
        .build_shared()
        .unwrap();
    let c = SubmissionSpec::builder("c")
        .command_line("c.sh")
        .process_count(3)
        .depends_on(Arc::clone(&a))
        .build_shared()
        .unwrap();
    let d = SubmissionSpec::builder("d")
        .command_line("d.sh")
        .depends_on(b)
        .depends_on(c)
        .build_shared()
        .unwrap();
    DependencyGraph::from_roots(label, [d]).unwrap()
}

fn condor(runner: &Arc<ScriptedRunner>, dir: &Path) -> HtCondorAdapter {
    let config = HtCondorConfig {
        work_dir: dir.to_path_buf(),
        ..Default::default()
    };
    HtCondorAdapter::new(config, runner.clone())
}

fn lsf(runner: &Arc<ScriptedRunner>, dir: &Path) -> LsfAdapter {
    let config = LsfConfig {
        work_dir: dir.to_path_buf(),
        ..Default::default()
    };
    LsfAdapter::new(config, runner.clone())
}

fn dag_reply(dir: &Path) -> String {
    let dag = dir.join("diamond.dag").display().to_string();
    format!(
        "\
-----------------------------------------------------------------------
File for submitting this DAG to HTCondor           : {dag}.condor.sub
Log of DAGMan debugging messages                 : {dag}.dagman.out
Log of HTCondor library output                     : {dag}.lib.out
Log of HTCondor library error messages             : {dag}.lib.err
Log of the life of condor_dagman itself          : {dag}.dagman.log

Submitting job(s).
1 job(s) submitted to cluster 1062.
-----------------------------------------------------------------------
"
    )
}

#[tokio::test]
async fn test_htcondor_dispatches_graph_as_dag() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.push_reply(&dag_reply(dir.path()), "", 0);
    let adapter = condor(&runner, dir.path());

    let graph = diamond("diamond");
    let handles = adapter.dispatch(DispatchTarget::Graph(&graph)).await.unwrap();

    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].id, JobId::Single(ClusterProc::new(1062, 0)));
    let dag_path = dir.path().join("diamond.dag");
    assert_eq!(handles[0].aux(AUX_DAG_FILE), Some(dag_path.to_str().unwrap()));
    assert!(handles[0].aux(AUX_USER_LOG).unwrap().ends_with("diamond.dag.dagman.log"));

    let dag = std::fs::read_to_string(&dag_path).unwrap();
    let a_sub = dir.path().join("a.sub");
    assert!(dag.starts_with(&format!("JOB a {}\n", a_sub.display())));
    assert!(dag.contains("PARENT a CHILD b c\n"));
    assert!(dag.contains("PARENT b CHILD d\n"));
    assert!(dag.contains("PARENT c CHILD d\n"));
    for node in ["a", "b", "c", "d"] {
        assert!(dir.path().join(format!("{node}.sub")).is_file());
    }
    let c_sub = std::fs::read_to_string(dir.path().join("c.sub")).unwrap();
    assert!(c_sub.contains("queue 3"));

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations[0].argv,
        vec![
            "condor_submit_dag".to_string(),
            "-force".to_string(),
            "-batch-name".to_string(),
            "diamond".to_string(),
            dag_path.display().to_string(),
        ]
    );
}

#[tokio::test]
async fn test_htcondor_wait_resolves_final_state() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .push_reply("745.0 - 745.0\n", "", 0)
        .push_reply("Time expired.\n", "", 1)
        .push_reply("All jobs done.\n", "", 0)
        .push_reply(" ID OWNER SUBMITTED RUN_TIME ST PRI SIZE CMD\n", "", 0)
        .push_reply(
            " ID OWNER SUBMITTED RUN_TIME ST COMPLETED CMD\n\
             745.0 alice 10/20 18:15 0+00:01:00 C 10/20 18:16 run.sh\n",
            "",
            0,
        );
    let adapter = condor(&runner, dir.path());

    let spec = SubmissionSpec::builder("run").command_line("run.sh").build_shared().unwrap();
    let handle = adapter.dispatch(DispatchTarget::Spec(&spec)).await.unwrap().remove(0);
    let policy = WaitPolicy::attempts(5, Duration::from_secs(1));
    let outcome = adapter.wait(&handle, &policy).await.unwrap();

    assert_eq!(outcome, WaitOutcome::Finished(JobState::Done));
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 5);
    let log = dir.path().join("run.log").display().to_string();
    assert_eq!(
        invocations[1].argv,
        vec!["condor_wait", "-wait", "1", log.as_str(), "745.0"]
    );
}

#[tokio::test]
async fn test_htcondor_wait_failure_is_submission_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .push_reply("12.0 - 12.0\n", "", 0)
        .push_reply("", "Couldn't open log", 2);
    let adapter = condor(&runner, dir.path());

    let spec = SubmissionSpec::builder("run").command_line("run.sh").build_shared().unwrap();
    let handle = adapter.dispatch(DispatchTarget::Spec(&spec)).await.unwrap().remove(0);
    let err = adapter.wait(&handle, &WaitPolicy::default()).await.unwrap_err();
    assert!(matches!(err, SchedError::SubmissionFailure { .. }));
    assert_eq!(err.output().unwrap().stderr, "Couldn't open log");
}

fn monitored_condor(runner: &Arc<ScriptedRunner>, dir: &Path) -> HtCondorAdapter {
    let config = HtCondorConfig {
        work_dir: dir.to_path_buf(),
        monitoring_url: Some("http://mon:5000".to_string()),
        ..Default::default()
    };
    HtCondorAdapter::new(config, runner.clone())
}

fn condor_completion(runner: &ScriptedRunner, cluster: u32, name: &str) {
    runner
        .push_reply(&format!("{cluster}.0 - {cluster}.0\n"), "", 0)
        .push_reply("All jobs done.\n", "", 0)
        .push_reply(" ID OWNER SUBMITTED RUN_TIME ST PRI SIZE CMD\n", "", 0)
        .push_reply(
            &format!(
                " ID OWNER SUBMITTED RUN_TIME ST COMPLETED CMD\n\
                 {cluster}.0 alice 10/20 18:15 0+00:01:00 C 10/20 18:16 {name}.sh\n"
            ),
            "",
            0,
        );
}

#[tokio::test]
async fn test_htcondor_single_node_graph_reports_to_graph_task() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.push_reply("90.0 - 90.0\n", "", 0);
    let adapter = monitored_condor(&runner, dir.path());

    let sim = SubmissionSpec::builder("sim").command_line("sim.sh").build_shared().unwrap();
    let graph = DependencyGraph::from_roots("mc", [sim]).unwrap();
    adapter.dispatch(DispatchTarget::Graph(&graph)).await.unwrap();

    let sub = std::fs::read_to_string(dir.path().join("sim.sub")).unwrap();
    assert!(sub.contains("FARMHAND_TASK_LABEL=mc "));
    assert!(!sub.contains("FARMHAND_TASK_LABEL=sim"));
}

#[tokio::test]
async fn test_htcondor_sequential_nodes_report_to_graph_task() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    condor_completion(&runner, 91, "a");
    condor_completion(&runner, 92, "b");
    let adapter = monitored_condor(&runner, dir.path());

    let a = SubmissionSpec::builder("a").command_line("a.sh").build_shared().unwrap();
    let b = SubmissionSpec::builder("b")
        .command_line("b.sh")
        .depends_on(a)
        .build_shared()
        .unwrap();
    let graph = DependencyGraph::from_roots("pipe", [b]).unwrap();

    let policy = WaitPolicy::attempts(2, Duration::ZERO);
    let handles = dispatch_sequentially(&adapter, &graph, &policy).await.unwrap();
    assert_eq!(handles.len(), 2);

    for node in ["a", "b"] {
        let sub = std::fs::read_to_string(dir.path().join(format!("{node}.sub"))).unwrap();
        assert!(
            sub.contains(&format!("FARMHAND_TASK_LABEL=pipe FARMHAND_PROCESS={node}")),
            "{node}.sub: {sub}"
        );
    }
    // Nodes go through condor_submit, never DAGMan.
    assert!(runner.invocations().iter().all(|call| call.argv[0] != "condor_submit_dag"));
}

#[tokio::test]
async fn test_lsf_rejects_graph_with_edges() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let adapter = lsf(&runner, dir.path());

    let err = adapter
        .dispatch(DispatchTarget::Graph(&diamond("diamond")))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::Unsupported { .. }));
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_lsf_sequential_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .push_reply("Job <101> is submitted to queue <normal>.\n", "", 0)
        .push_reply("101 alice DONE normal host1 host2 prep Oct 20 18:15\n", "", 0)
        .push_reply("", "", 0)
        .push_reply("Job <102> is submitted to queue <normal>.\n", "", 0)
        .push_reply("", "Job <102> is not found", 255)
        .push_reply("102 alice DONE normal host1 host2 sim Oct 20 18:20\n", "", 0);
    let adapter = lsf(&runner, dir.path());

    let prep = SubmissionSpec::builder("prep").command_line("prep.sh").build_shared().unwrap();
    let sim = SubmissionSpec::builder("sim")
        .command_line("sim.sh")
        .depends_on(prep)
        .build_shared()
        .unwrap();
    let graph = DependencyGraph::from_roots("chain", [sim]).unwrap();

    let policy = WaitPolicy::attempts(3, Duration::ZERO);
    let handles = dispatch_sequentially(&adapter, &graph, &policy).await.unwrap();

    let ids: Vec<String> = handles.iter().map(|h| h.id.to_string()).collect();
    assert_eq!(ids, vec!["101", "102"]);
    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 6);
    assert_eq!(invocations[0].argv[0], "bsub");
    assert_eq!(invocations[4].argv.last().map(String::as_str), Some("102"));
    assert!(invocations[5].argv.contains(&"-d".to_string()));
}

#[tokio::test]
async fn test_lsf_sequential_pipeline_stops_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner
        .push_reply("Job <101> is submitted to queue <normal>.\n", "", 0)
        .push_reply("101 alice EXIT normal host1 host2 prep Oct 20 18:15\n", "", 0)
        .push_reply("", "", 0);
    let adapter = lsf(&runner, dir.path());

    let prep = SubmissionSpec::builder("prep").command_line("prep.sh").build_shared().unwrap();
    let sim = SubmissionSpec::builder("sim")
        .command_line("sim.sh")
        .depends_on(prep)
        .build_shared()
        .unwrap();
    let graph = DependencyGraph::from_roots("chain", [sim]).unwrap();

    let err = dispatch_sequentially(&adapter, &graph, &WaitPolicy::attempts(3, Duration::ZERO))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedError::SubmissionFailure { .. }));
    assert!(err.to_string().contains("prep"));
    assert_eq!(runner.call_count(), 3);
}

#[tokio::test]
async fn test_registry_builds_configured_backends() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    runner.push_reply("Job <7> is submitted to default queue <normal>.\n", "", 0);

    let mut settings = BackendSettings::default();
    settings.lsf.work_dir = dir.path().to_path_buf();
    let backend = BackendRegistry::with_builtins()
        .create("lsf", &settings, runner.clone())
        .unwrap();

    let spec = SubmissionSpec::builder("solo").command_line("solo.sh").build_shared().unwrap();
    let handles = backend.dispatch(DispatchTarget::Spec(&spec)).await.unwrap();
    assert_eq!(handles[0].backend, "LSF");
    assert_eq!(handles[0].id, JobId::Token("7".to_string()));
}
