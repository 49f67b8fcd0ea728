//! Task, array and process lifecycle model.
//!
//! A process moves `unstarted → active → terminated` and never back. The
//! first `started` or `beat` activates it; the first `terminated` ends it.
//! Later events are kept as history without touching the state.

use std::fmt;

use chrono::{DateTime, Utc};
use farmhand_sched::EncodedGraph;
use farmhand_sched::monitoring::wire::{
    Cardinality, EventBody, EventRequest, ProcessState, TaskCreate,
};

use crate::error::{StoreError, StoreResult};

/// What a task declares under one process name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declaration {
    /// A standalone process.
    Single,
    /// An array of `job_count` members, `fault_tolerance` of which may fail.
    Array {
        job_count: u32,
        fault_tolerance: Option<u32>,
    },
}

impl Declaration {
    /// Interpret a wire cardinality.
    pub fn from_cardinality(name: &str, cardinality: Option<Cardinality>) -> StoreResult<Self> {
        let positive = |n: i64| u32::try_from(n).ok().filter(|n| *n >= 1);
        match cardinality {
            None => Ok(Declaration::Single),
            Some(Cardinality::Count(n)) => {
                let job_count = positive(n).ok_or_else(|| {
                    StoreError::Invalid(format!("process {name}: cardinality {n} must be >= 1"))
                })?;
                Ok(Declaration::Array {
                    job_count,
                    fault_tolerance: None,
                })
            }
            Some(Cardinality::FaultTolerant(capacity, min_success)) => {
                match (positive(capacity), positive(min_success)) {
                    (Some(job_count), Some(min)) if min <= job_count => Ok(Declaration::Array {
                        job_count,
                        fault_tolerance: Some(job_count - min),
                    }),
                    _ => Err(StoreError::Invalid(format!(
                        "process {name}: [capacity, minSuccess] = [{capacity}, {min_success}] \
                         must satisfy 1 <= minSuccess <= capacity"
                    ))),
                }
            }
        }
    }
}

/// Validated task creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub label: String,
    pub type_label: Option<String>,
    pub config: serde_json::Value,
    pub declarations: Vec<(String, Declaration)>,
    pub dep_graph: Option<EncodedGraph>,
    pub tags: Vec<String>,
    pub comment: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub host: Option<String>,
}

impl NewTask {
    /// Validate a `PUT /task/{label}` body.
    pub fn from_request(label: &str, request: TaskCreate) -> StoreResult<Self> {
        if label.trim().is_empty() {
            return Err(StoreError::Invalid("task label must not be empty".into()));
        }
        if request.processes.is_empty() {
            return Err(StoreError::Invalid(format!("task {label} declares no processes")));
        }

        let mut declarations = Vec::with_capacity(request.processes.len());
        for (name, cardinality) in request.processes {
            if name.trim().is_empty() {
                return Err(StoreError::Invalid("process names must not be empty".into()));
            }
            let declaration = Declaration::from_cardinality(&name, cardinality)?;
            declarations.push((name, declaration));
        }

        let dep_graph = request
            .dep_graph
            .map(EncodedGraph::from_value)
            .transpose()
            .map_err(|e| StoreError::Invalid(format!("depGraph: {e}")))?;

        let (created_at, host) = match request.meta {
            Some(meta) => (meta.time, Some(meta.host)),
            None => (Utc::now(), None),
        };

        Ok(Self {
            label: label.to_string(),
            type_label: request.type_label,
            config: request.config,
            declarations,
            dep_graph,
            tags: request.tags,
            comment: request.comment,
            username: request.username,
            email: request.email,
            created_at,
            host,
        })
    }
}

/// Process addressed by an event or a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessTarget {
    Standalone(String),
    /// `job` is 1-based.
    ArrayMember { array: String, job: u32 },
}

impl fmt::Display for ProcessTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessTarget::Standalone(name) => f.write_str(name),
            ProcessTarget::ArrayMember { array, job } => write!(f, "{array}:{job}"),
        }
    }
}

/// An event ready to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub body: EventBody,
    pub payload: Option<serde_json::Value>,
    pub time: DateTime<Utc>,
    pub host: Option<String>,
}

impl From<EventRequest> for NewEvent {
    fn from(request: EventRequest) -> Self {
        let (time, host) = match request.meta {
            Some(meta) => (meta.time, Some(meta.host)),
            None => (Utc::now(), None),
        };
        Self {
            body: request.body,
            payload: request.payload,
            time,
            host,
        }
    }
}

/// Lifecycle state after applying `event` in state `current`.
pub fn next_state(current: ProcessState, event: &EventBody) -> ProcessState {
    match (current, event) {
        (ProcessState::Terminated, _) => ProcessState::Terminated,
        (_, EventBody::Terminated { .. }) => ProcessState::Terminated,
        (_, EventBody::Started | EventBody::Beat { .. }) => ProcessState::Active,
    }
}

/// Whether the process should keep going after an event.
///
/// `false` once the process was already terminated when the event arrived,
/// or when an array has more failed members than it tolerates.
pub fn keep_going(
    state_before: ProcessState,
    failed_members: Option<u32>,
    fault_tolerance: Option<u32>,
) -> bool {
    if state_before == ProcessState::Terminated {
        return false;
    }
    match failed_members {
        Some(failed) => failed <= fault_tolerance.unwrap_or(0),
        None => true,
    }
}
