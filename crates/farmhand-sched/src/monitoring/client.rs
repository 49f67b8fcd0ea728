//! Submission-side monitoring client.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpStream;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::backend::JobHandle;
use crate::error::SchedResult;
use crate::graph::DependencyGraph;
use crate::monitoring::wire::{API_PREFIX, Cardinality, Meta, TaskCreate};
use crate::monitoring::{ENV_MONITORING_PREFIX, ENV_MONITORING_URL};
use crate::spec::SubmissionSpec;

/// Monitoring endpoint and task metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitoringConfig {
    /// `http://host:port`; monitoring is disabled when absent.
    pub address: Option<String>,
    pub api_prefix: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub tags: Vec<String>,
    pub comment: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            address: None,
            api_prefix: API_PREFIX.to_string(),
            connect_timeout_secs: 2,
            request_timeout_secs: 10,
            tags: Vec::new(),
            comment: None,
            username: None,
            email: None,
        }
    }
}

impl MonitoringConfig {
    /// Server settings of a running job, read from the variables the
    /// adapters inject. `None` when the job carries no monitoring URL.
    pub fn from_job_env<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = lookup(ENV_MONITORING_URL).filter(|a| !a.trim().is_empty())?;
        let mut config = Self {
            address: Some(address),
            ..Default::default()
        };
        if let Some(prefix) = lookup(ENV_MONITORING_PREFIX).filter(|p| !p.trim().is_empty()) {
            config.api_prefix = prefix;
        }
        Some(config)
    }
}

/// Result of a task registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Created,
    /// A task with that label exists already (HTTP 409).
    AlreadyExists,
    /// The server refused the payload.
    Rejected { status: u16, body: String },
    /// The server could not be reached; nothing was recorded.
    Unreachable,
}

/// Expected process count of one spec, as the server understands it.
pub fn cardinality_of(spec: &SubmissionSpec) -> Option<Cardinality> {
    let total = i64::try_from(spec.total_instances()).unwrap_or(i64::MAX);
    match spec.min_success() {
        Some(min) if i64::from(min) < total => {
            Some(Cardinality::FaultTolerant(total, i64::from(min)))
        }
        _ if total > 1 => Some(Cardinality::Count(total)),
        _ => None,
    }
}

/// Check that the configured server accepts connections; yields its base URL.
async fn check_reachable(config: &MonitoringConfig) -> Option<String> {
    let Some(address) = config.address.as_deref() else {
        info!("No monitoring server configured; monitoring disabled");
        return None;
    };
    let url = match Url::parse(address) {
        Ok(url) => url,
        Err(e) => {
            warn!(%address, "Invalid monitoring address: {}", e);
            return None;
        }
    };
    let (Some(host), Some(port)) = (url.host_str(), url.port_or_known_default()) else {
        warn!(%address, "Monitoring address lacks host or port");
        return None;
    };

    let timeout = Duration::from_secs(config.connect_timeout_secs);
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => {
            debug!(%address, "Monitoring server reachable");
            Some(address.trim_end_matches('/').to_string())
        }
        Ok(Err(e)) => {
            warn!(%address, "Monitoring server unreachable: {}", e);
            None
        }
        Err(_) => {
            warn!(%address, "Monitoring server did not answer within {:?}", timeout);
            None
        }
    }
}

/// Client reporting dispatched pipelines to the monitoring server.
pub struct MonitoringClient {
    config: MonitoringConfig,
    base: String,
    http: reqwest::Client,
    span: Span,
}

impl MonitoringClient {
    /// Check that the configured server is reachable and build a client for it.
    ///
    /// Returns `None` when monitoring is not configured or the server does
    /// not accept TCP connections within the connect timeout.
    pub async fn connect(config: MonitoringConfig, span: Option<Span>) -> Option<Self> {
        let span = span.unwrap_or_else(|| info_span!("monitoring"));
        let base = check_reachable(&config).instrument(span.clone()).await?;

        let http = match reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
        {
            Ok(http) => http,
            Err(e) => {
                span.in_scope(|| warn!("Cannot build HTTP client: {}", e));
                return None;
            }
        };

        Some(Self {
            base,
            config,
            http,
            span,
        })
    }

    /// Server base URL.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// URL of a task resource.
    pub fn task_url(&self, label: &str) -> String {
        format!("{}{}/task/{}", self.base, self.config.api_prefix, label)
    }

    /// Build the `PUT /task/{label}` body for a dispatched graph.
    pub fn task_payload(
        &self,
        type_label: Option<&str>,
        graph: &DependencyGraph,
        handles: &[JobHandle],
    ) -> SchedResult<TaskCreate> {
        let processes = graph
            .nodes()
            .map(|spec| (spec.name().to_string(), cardinality_of(spec)))
            .collect();
        let jobs: Vec<_> = handles
            .iter()
            .map(|handle| json!({"name": handle.name, "id": handle.id.to_string()}))
            .collect();
        let backend = handles.first().map(|handle| handle.backend.clone());

        Ok(TaskCreate {
            type_label: type_label.map(str::to_string),
            config: json!({"backend": backend, "jobs": jobs}),
            processes,
            dep_graph: Some(serde_json::to_value(graph.encode())?),
            tags: self.config.tags.clone(),
            comment: self.config.comment.clone(),
            username: self.config.username.clone(),
            email: self.config.email.clone(),
            meta: Some(Meta::now()),
        })
    }

    /// Register a dispatched graph as a monitoring task.
    ///
    /// Transport failures are logged and reported as
    /// [`RegistrationOutcome::Unreachable`].
    pub async fn register(
        &self,
        label: &str,
        type_label: Option<&str>,
        graph: &DependencyGraph,
        handles: &[JobHandle],
    ) -> SchedResult<RegistrationOutcome> {
        let payload = self.task_payload(type_label, graph, handles)?;
        let url = self.task_url(label);

        async move {
            let response = match self.http.put(&url).json(&payload).send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(%url, "Task registration failed: {}", e);
                    return Ok(RegistrationOutcome::Unreachable);
                }
            };
            let status = response.status();
            let outcome = match status {
                StatusCode::CREATED | StatusCode::OK => {
                    info!(task = label, processes = payload.processes.len(), "Task registered");
                    RegistrationOutcome::Created
                }
                StatusCode::CONFLICT => {
                    warn!(task = label, "Task already registered");
                    RegistrationOutcome::AlreadyExists
                }
                _ => {
                    let body = response.text().await.unwrap_or_default();
                    warn!(task = label, status = status.as_u16(), %body, "Task registration rejected");
                    RegistrationOutcome::Rejected {
                        status: status.as_u16(),
                        body,
                    }
                }
            };
            Ok(outcome)
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::JobId;
    use axum::extract::{Path, State};
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::put;
    use axum::{Json, Router};
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn graph() -> DependencyGraph {
        let prep = SubmissionSpec::builder("prep")
            .command_line("prep.sh")
            .build_shared()
            .unwrap();
        let sim = SubmissionSpec::builder("sim")
            .command_line("sim.sh")
            .process_count(10)
            .min_success(8)
            .depends_on(Arc::clone(&prep))
            .build_shared()
            .unwrap();
        let merge = SubmissionSpec::builder("merge")
            .command_line("merge.sh")
            .process_count(4)
            .depends_on(Arc::clone(&sim))
            .build_shared()
            .unwrap();
        DependencyGraph::from_roots("mc", [merge]).unwrap()
    }

    #[derive(Clone)]
    struct Recorder {
        status: HttpStatus,
        seen: mpsc::UnboundedSender<(String, Value)>,
    }

    async fn record_task(
        State(recorder): State<Recorder>,
        Path(label): Path<String>,
        Json(body): Json<Value>,
    ) -> HttpStatus {
        let _ = recorder.seen.send((label, body));
        recorder.status
    }

    /// Serve `PUT {prefix}/task/{label}` answering `status`; yields the
    /// server address and the recorded registrations.
    async fn serve(
        prefix: &str,
        status: HttpStatus,
    ) -> (String, mpsc::UnboundedReceiver<(String, Value)>) {
        let (seen, received) = mpsc::unbounded_channel();
        let app = Router::new()
            .route(&format!("{prefix}/task/{{label}}"), put(record_task))
            .with_state(Recorder { status, seen });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (address, received)
    }

    #[test]
    fn test_cardinality_of() {
        let g = graph();
        assert_eq!(cardinality_of(g.get("prep").unwrap()), None);
        assert_eq!(
            cardinality_of(g.get("sim").unwrap()),
            Some(Cardinality::FaultTolerant(10, 8))
        );
        assert_eq!(cardinality_of(g.get("merge").unwrap()), Some(Cardinality::Count(4)));
    }

    #[test]
    fn test_config_from_job_env() {
        let config = MonitoringConfig::from_job_env(|key| match key {
            ENV_MONITORING_URL => Some("http://mon:5000".into()),
            ENV_MONITORING_PREFIX => Some("/farm/v0".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.address.as_deref(), Some("http://mon:5000"));
        assert_eq!(config.api_prefix, "/farm/v0");

        let defaulted = MonitoringConfig::from_job_env(|key| {
            (key == ENV_MONITORING_URL).then(|| "http://mon:5000".to_string())
        })
        .unwrap();
        assert_eq!(defaulted.api_prefix, API_PREFIX);
        assert!(MonitoringConfig::from_job_env(|_| None).is_none());
    }

    #[tokio::test]
    async fn test_connect_disabled_without_address() {
        assert!(MonitoringClient::connect(MonitoringConfig::default(), None).await.is_none());
    }

    #[tokio::test]
    async fn test_connect_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let config = MonitoringConfig {
            address: Some(address),
            ..Default::default()
        };
        assert!(MonitoringClient::connect(config, None).await.is_none());
    }

    #[tokio::test]
    async fn test_register_created() {
        let (address, mut received) = serve(API_PREFIX, HttpStatus::CREATED).await;
        let config = MonitoringConfig {
            address: Some(address),
            tags: vec!["mc".to_string()],
            ..Default::default()
        };
        let client = MonitoringClient::connect(config, None).await.unwrap();
        let handles = vec![JobHandle::new("HTCondor", "mc", JobId::parse("42.0"))];

        let outcome = client.register("mc-1", Some("mc"), &graph(), &handles).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Created);

        let (label, body) = received.recv().await.unwrap();
        assert_eq!(label, "mc-1");
        assert_eq!(body["typeLabel"], "mc");
        assert_eq!(body["processes"]["sim"], serde_json::json!([10, 8]));
        assert_eq!(body["processes"]["prep"], Value::Null);
        assert_eq!(body["depGraph"]["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(body["config"]["backend"], "HTCondor");
        assert_eq!(body["config"]["jobs"][0]["id"], "42.0");
        assert_eq!(body["tags"][0], "mc");
    }

    #[tokio::test]
    async fn test_register_conflict() {
        let (address, _received) = serve(API_PREFIX, HttpStatus::CONFLICT).await;
        let config = MonitoringConfig {
            address: Some(address),
            ..Default::default()
        };
        let client = MonitoringClient::connect(config, None).await.unwrap();
        let outcome = client.register("mc-1", None, &graph(), &[]).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn test_register_under_configured_prefix() {
        let (address, mut received) = serve("/farm/v0", HttpStatus::CREATED).await;
        let config = MonitoringConfig {
            address: Some(address),
            api_prefix: "/farm/v0".to_string(),
            ..Default::default()
        };
        let client = MonitoringClient::connect(config, None).await.unwrap();
        assert!(client.task_url("mc").ends_with("/farm/v0/task/mc"));

        let outcome = client.register("mc", None, &graph(), &[]).await.unwrap();
        assert_eq!(outcome, RegistrationOutcome::Created);
        assert_eq!(received.recv().await.unwrap().0, "mc");
    }

    #[tokio::test]
    async fn test_register_rejected_keeps_body() {
        let (address, _received) = serve(API_PREFIX, HttpStatus::BAD_REQUEST).await;
        let config = MonitoringConfig {
            address: Some(address),
            ..Default::default()
        };
        let client = MonitoringClient::connect(config, None).await.unwrap();
        let outcome = client.register("mc", None, &graph(), &[]).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Rejected { status: 400, .. }));
    }
}
