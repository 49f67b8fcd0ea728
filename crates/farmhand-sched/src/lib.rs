//! Farmhand: dependency-aware job submission for HTCondor and LSF.
//!
//! This crate turns job descriptions into native batch submissions, tracks
//! them through the cluster, and optionally reports them to a monitoring
//! server.
//!
//! # Overview
//!
//! 1. **Describe**: build [`SubmissionSpec`]s, possibly with implicit arrays
//!    (alternative tokens expanded to their cartesian product) and
//!    dependencies on other specs.
//! 2. **Assemble**: union the dependency closures into a [`DependencyGraph`]
//!    (or load a [`PipelineManifest`]).
//! 3. **Dispatch**: hand the submission or graph to a [`BatchBackend`]; HTCondor
//!    compiles graphs to DAGMan, LSF submits edge-less graphs node by node.
//! 4. **Track**: poll, wait, kill, list and fetch logs through the same
//!    trait.
//!
//! # Supported Batch Systems
//!
//! | Backend | Commands |
//! |---------|----------|
//! | HTCondor | condor_submit, condor_submit_dag, condor_wait, condor_q, condor_history, condor_rm |
//! | LSF | bsub, bjobs, bkill, bpeek |
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use farmhand_sched::{
//!     BackendRegistry, DependencyGraph, DispatchTarget, FarmhandConfig, SubmissionSpec,
//!     TokioRunner, WaitPolicy,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = FarmhandConfig::load(None)?;
//!     let backend = BackendRegistry::with_builtins().create(
//!         &config.backend,
//!         &config.backend_settings(),
//!         Arc::new(TokioRunner),
//!     )?;
//!
//!     let prep = SubmissionSpec::builder("prep").command_line("prep.sh").build_shared()?;
//!     let sim = SubmissionSpec::builder("sim")
//!         .command_line("sim.sh")
//!         .process_count(10)
//!         .depends_on(prep)
//!         .build_shared()?;
//!     let graph = DependencyGraph::from_roots("mc", [sim])?;
//!
//!     for handle in backend.dispatch(DispatchTarget::Graph(&graph)).await? {
//!         let outcome = backend.wait(&handle, &WaitPolicy::default()).await?;
//!         println!("{}: {:?}", handle.id, outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod encoding;
pub mod error;
pub mod graph;
pub mod htcondor;
pub mod lsf;
pub mod monitoring;
pub mod pipeline;
pub mod process;
pub mod registry;
pub mod spec;

// Re-exports
pub use backend::{
    ActiveJobInfo, BatchBackend, ClusterProc, DispatchTarget, JobHandle, JobId, JobLogs,
    JobState, QueueCommand, QueueRequest, WaitOutcome, WaitPolicy, dispatch_sequentially,
};
pub use config::{FarmhandConfig, parse_backend_arguments};
pub use encoding::EncodedGraph;
pub use error::{CommandOutput, SchedError, SchedResult};
pub use graph::DependencyGraph;
pub use htcondor::{HtCondorAdapter, HtCondorConfig};
pub use lsf::{LsfAdapter, LsfConfig};
pub use monitoring::{
    MonitoringClient, MonitoringConfig, ProcessReporter, ProcessSignature, RegistrationOutcome,
};
pub use pipeline::PipelineManifest;
pub use process::{Invocation, ProcessRunner, ScriptedRunner, TokioRunner};
pub use registry::{BackendRegistry, BackendSettings};
pub use spec::{CommandToken, SubmissionSpec};
