//! HTCondor backend.
//!
//! Single jobs are compiled into a submit description and handed to
//! `condor_submit`; graphs additionally get a DAGMan file submitted through
//! `condor_submit_dag`. Waiting blocks on the user log via `condor_wait`.

mod adapter;
pub mod parser;
pub mod templates;

pub use adapter::{HTCONDOR_BACKEND, HtCondorAdapter, HtCondorConfig, HtCondorExecutables};
