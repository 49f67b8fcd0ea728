//! Monitoring integration.
//!
//! [`MonitoringClient`] registers dispatched pipelines as tasks;
//! [`ProcessReporter`] runs inside a job and reports its lifecycle. Both
//! speak the JSON bodies defined in [`wire`].

mod client;
mod reporter;
pub mod wire;

pub use client::{MonitoringClient, MonitoringConfig, RegistrationOutcome, cardinality_of};
pub use reporter::{
    ENV_HTCONDOR_INDEX, ENV_LSF_INDEX, ENV_LSF_JOB_NAME, ENV_MONITORING_PREFIX,
    ENV_MONITORING_URL, ENV_PROCESS, ENV_TASK_LABEL, EventReply, MonitoringEnv, ProcessReporter,
    ProcessSignature,
};
