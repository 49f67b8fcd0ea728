//! JSON bodies exchanged with the monitoring service.
//!
//! Shared by the client side (submission and process reporting) and the
//! server crate, so both ends agree on field names.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every monitoring route.
pub const API_PREFIX: &str = "/api/v0";

/// Timestamp envelope accompanying every mutating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub time: DateTime<Utc>,
    pub host: String,
}

impl Meta {
    /// Envelope stamped with the current time and host.
    pub fn now() -> Self {
        Self {
            time: Utc::now(),
            host: hostname(),
        }
    }
}

/// Name of the local host, as far as it can be told.
pub fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Expected number of processes under one name.
///
/// A missing value (`null`) denotes a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cardinality {
    /// Uniform array.
    Count(i64),
    /// `[capacity, minSuccess]`.
    FaultTolerant(i64, i64),
}

/// Body of `PUT /task/{label}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_label: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub processes: BTreeMap<String, Option<Cardinality>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_graph: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "meta", alias = "!meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Lifecycle event carried by a PATCH request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventBody {
    Started,
    Beat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        current: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        upper: Option<i64>,
    },
    Terminated {
        #[serde(default, rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
}

impl EventBody {
    /// Discriminator as stored and transmitted.
    pub fn kind(&self) -> &'static str {
        match self {
            EventBody::Started => "started",
            EventBody::Beat { .. } => "beat",
            EventBody::Terminated { .. } => "terminated",
        }
    }
}

/// Body of `PATCH /task/{label}/process/{name}` and
/// `PATCH /task/{label}/array/{array}/{job}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRequest {
    #[serde(flatten)]
    pub body: EventBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, rename = "meta", alias = "!meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl EventRequest {
    /// Event stamped with the current time and host.
    pub fn new(body: EventBody) -> Self {
        Self {
            body,
            payload: None,
            meta: Some(Meta::now()),
        }
    }
}

/// Lifecycle state of a remote process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Unstarted,
    Active,
    Terminated,
}

impl ProcessState {
    pub fn name(&self) -> &'static str {
        match self {
            ProcessState::Unstarted => "unstarted",
            ProcessState::Active => "active",
            ProcessState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response body of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    /// Whether this event created the process.
    pub created: bool,
    pub state: ProcessState,
    /// Advisory: `false` asks the process to stop.
    pub keep_going: bool,
}
