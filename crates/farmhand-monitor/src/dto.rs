//! Data Transfer Objects for the monitoring API.
//!
//! Request bodies and the event reply live in `farmhand_sched::monitoring::wire`
//! so the submitting side can share them; this module holds the read models.

use chrono::{DateTime, Utc};
use farmhand_sched::EncodedGraph;
use farmhand_sched::monitoring::wire::{EventBody, ProcessState};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Row of `GET /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub label: String,
    pub type_label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Standalone processes plus array members.
    pub process_count: u64,
}

/// Standalone process as listed in a task descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessSummary {
    pub name: String,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    pub event_count: u64,
}

/// Array with member tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayDescriptor {
    pub name: String,
    pub job_count: u32,
    pub fault_tolerance: Option<u32>,
    /// Members never heard from count as unstarted.
    pub unstarted: u32,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
}

/// Response of `GET /task/{label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDescriptor {
    pub label: String,
    pub type_label: Option<String>,
    pub config: serde_json::Value,
    pub dep_graph: Option<EncodedGraph>,
    pub tags: Vec<String>,
    pub comment: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub host: Option<String>,
    pub processes: Vec<ProcessSummary>,
    pub arrays: Vec<ArrayDescriptor>,
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Arrival sequence number, increasing per store.
    pub seq: i64,
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    /// Time reported by the sender.
    pub time: DateTime<Utc>,
    pub host: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Response of `GET /task/{label}/process/{name}` and
/// `GET /task/{label}/array/{array}/{job}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub task: String,
    pub signature: String,
    pub state: ProcessState,
    pub exit_code: Option<i32>,
    /// In arrival order.
    pub events: Vec<EventRecord>,
}
