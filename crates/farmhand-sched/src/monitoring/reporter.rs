//! Lifecycle reporting from inside a running batch process.

use std::fmt;
use std::time::Duration;

use tracing::{Instrument, Span, debug, info_span, warn};

use crate::error::{SchedError, SchedResult};
use crate::monitoring::MonitoringConfig;
use crate::monitoring::wire::{EventBody, EventRequest, EventResponse, ProcessState};

/// Variable carrying the monitoring server URL into a job.
pub const ENV_MONITORING_URL: &str = "FARMHAND_MONITORING_URL";
/// Variable carrying the monitoring API prefix, when not the default.
pub const ENV_MONITORING_PREFIX: &str = "FARMHAND_MONITORING_PREFIX";
/// Variable carrying the monitoring task label.
pub const ENV_TASK_LABEL: &str = "FARMHAND_TASK_LABEL";
/// Variable carrying the process (or array) name.
pub const ENV_PROCESS: &str = "FARMHAND_PROCESS";
/// HTCondor job index: 0-based, `SINGLE` outside arrays.
pub const ENV_HTCONDOR_INDEX: &str = "HTCONDOR_JOBINDEX";
/// LSF job index: 1-based, 0 outside arrays.
pub const ENV_LSF_INDEX: &str = "LSB_JOBINDEX";
/// LSF job name, used when no process name was injected.
pub const ENV_LSF_JOB_NAME: &str = "LSB_JOBNAME";

/// Monitoring target handed to a batch job through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringEnv {
    pub url: String,
    pub api_prefix: Option<String>,
    pub task_label: String,
}

impl MonitoringEnv {
    /// Variables injected into the jobs of process `name`.
    pub fn variables(&self, name: &str) -> Vec<(String, String)> {
        let mut vars = vec![(ENV_MONITORING_URL.to_string(), self.url.clone())];
        if let Some(prefix) = &self.api_prefix {
            vars.push((ENV_MONITORING_PREFIX.to_string(), prefix.clone()));
        }
        vars.push((ENV_TASK_LABEL.to_string(), self.task_label.clone()));
        vars.push((ENV_PROCESS.to_string(), name.to_string()));
        vars
    }
}

/// Identity of a process within a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProcessSignature {
    Standalone(String),
    /// Array member; `job` is 1-based.
    ArrayMember { array: String, job: u32 },
}

impl ProcessSignature {
    /// Parse `name` or `array:job`.
    pub fn parse(s: &str) -> SchedResult<Self> {
        match s.rsplit_once(':') {
            Some((array, job)) => {
                let job = job.parse::<u32>().ok().filter(|j| *j >= 1).ok_or_else(|| {
                    SchedError::MonitoringError(format!("invalid array job number in '{s}'"))
                })?;
                if array.is_empty() {
                    return Err(SchedError::MonitoringError(format!("empty array name in '{s}'")));
                }
                Ok(Self::ArrayMember {
                    array: array.to_string(),
                    job,
                })
            }
            None if !s.is_empty() => Ok(Self::Standalone(s.to_string())),
            None => Err(SchedError::MonitoringError("empty process signature".to_string())),
        }
    }

    /// Derive the signature from the batch environment.
    ///
    /// The name comes from `FARMHAND_PROCESS` (or the LSF job name); the
    /// job number from `HTCONDOR_JOBINDEX` or `LSB_JOBINDEX`.
    pub fn from_env<F>(lookup: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let name = lookup(ENV_PROCESS)
            .or_else(|| {
                lookup(ENV_LSF_JOB_NAME)
                    .map(|job| job.split_once('[').map_or(job.clone(), |(base, _)| base.to_string()))
            })
            .filter(|name| !name.is_empty())?;

        if let Some(index) = lookup(ENV_HTCONDOR_INDEX) {
            if index == "SINGLE" {
                return Some(Self::Standalone(name));
            }
            let index = index.parse::<u32>().ok()?;
            return Some(Self::ArrayMember {
                array: name,
                job: index + 1,
            });
        }
        match lookup(ENV_LSF_INDEX).and_then(|i| i.parse::<u32>().ok()) {
            Some(0) | None => Some(Self::Standalone(name)),
            Some(job) => Some(Self::ArrayMember { array: name, job }),
        }
    }

    /// Route below `/task/{label}/`.
    pub fn path(&self) -> String {
        match self {
            Self::Standalone(name) => format!("process/{name}"),
            Self::ArrayMember { array, job } => format!("array/{array}/{job}"),
        }
    }
}

impl fmt::Display for ProcessSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone(name) => f.write_str(name),
            Self::ArrayMember { array, job } => write!(f, "{array}:{job}"),
        }
    }
}

/// Server acknowledgement of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventReply {
    /// HTTP status (201 when the event created the process).
    pub status: u16,
    pub state: ProcessState,
    pub keep_going: bool,
}

/// Sends the lifecycle events of one process.
pub struct ProcessReporter {
    url: String,
    signature: ProcessSignature,
    insist: bool,
    http: reqwest::Client,
    span: Span,
}

impl ProcessReporter {
    /// Reporter for `signature` within task `task_label` on the server
    /// described by `config`.
    pub fn new(
        config: &MonitoringConfig,
        task_label: &str,
        signature: ProcessSignature,
        insist: bool,
    ) -> SchedResult<Self> {
        let address = config.address.as_deref().ok_or_else(|| {
            SchedError::MonitoringError("no monitoring address configured".to_string())
        })?;
        let url = format!(
            "{}{}/task/{}/{}",
            address.trim_end_matches('/'),
            config.api_prefix,
            task_label,
            signature.path()
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let span = info_span!("reporter", process = %signature);
        Ok(Self {
            url,
            signature,
            insist,
            http,
            span,
        })
    }

    /// Reporter configured from the variables the adapters inject.
    ///
    /// `None` when the job was not submitted with monitoring.
    pub fn from_env<F>(lookup: F, insist: bool) -> Option<SchedResult<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = MonitoringConfig::from_job_env(&lookup)?;
        let label = lookup(ENV_TASK_LABEL)?;
        let signature = ProcessSignature::from_env(&lookup)?;
        Some(Self::new(&config, &label, signature, insist))
    }

    pub fn signature(&self) -> &ProcessSignature {
        &self.signature
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn started(&self) -> SchedResult<EventReply> {
        self.send(EventBody::Started).await
    }

    /// Heartbeat with optional progress `current` of `upper`.
    pub async fn beat(&self, current: Option<i64>, upper: Option<i64>) -> SchedResult<EventReply> {
        self.send(EventBody::Beat { current, upper }).await
    }

    pub async fn terminated(&self, exit_code: Option<i32>) -> SchedResult<EventReply> {
        self.send(EventBody::Terminated { exit_code }).await
    }

    /// Whether the process should continue after `reply`.
    pub fn should_proceed(&self, reply: &EventReply) -> bool {
        if reply.keep_going {
            return true;
        }
        if self.insist {
            self.span
                .in_scope(|| warn!("Server asked to stop; continuing because insist is set"));
            return true;
        }
        false
    }

    async fn send(&self, body: EventBody) -> SchedResult<EventReply> {
        let request = EventRequest::new(body);
        async {
            let response = self.http.patch(&self.url).json(&request).send().await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(SchedError::MonitoringError(format!(
                    "{} event rejected with {}: {}",
                    body.kind(),
                    status,
                    text
                )));
            }
            let reply: EventResponse = response.json().await?;
            debug!(
                event = body.kind(),
                state = %reply.state,
                keep_going = reply.keep_going,
                "Event acknowledged"
            );
            Ok(EventReply {
                status: status.as_u16(),
                state: reply.state,
                keep_going: reply.keep_going,
            })
        }
        .instrument(self.span.clone())
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_signature_parse_and_display() {
        let member = ProcessSignature::parse("sim:3").unwrap();
        assert_eq!(
            member,
            ProcessSignature::ArrayMember {
                array: "sim".to_string(),
                job: 3
            }
        );
        assert_eq!(member.to_string(), "sim:3");
        assert_eq!(member.path(), "array/sim/3");

        let single = ProcessSignature::parse("prep").unwrap();
        assert_eq!(single.path(), "process/prep");

        assert!(ProcessSignature::parse("sim:0").is_err());
        assert!(ProcessSignature::parse(":2").is_err());
        assert!(ProcessSignature::parse("").is_err());
    }

    #[test]
    fn test_signature_from_htcondor_env() {
        let single = ProcessSignature::from_env(env(&[
            (ENV_PROCESS, "prep"),
            (ENV_HTCONDOR_INDEX, "SINGLE"),
        ]));
        assert_eq!(single, Some(ProcessSignature::Standalone("prep".to_string())));

        let member = ProcessSignature::from_env(env(&[
            (ENV_PROCESS, "sim"),
            (ENV_HTCONDOR_INDEX, "0"),
        ]));
        assert_eq!(
            member,
            Some(ProcessSignature::ArrayMember {
                array: "sim".to_string(),
                job: 1
            })
        );
    }

    #[test]
    fn test_signature_from_lsf_env() {
        let member = ProcessSignature::from_env(env(&[
            (ENV_LSF_JOB_NAME, "sim[1-10]"),
            (ENV_LSF_INDEX, "4"),
        ]));
        assert_eq!(
            member,
            Some(ProcessSignature::ArrayMember {
                array: "sim".to_string(),
                job: 4
            })
        );
        let single = ProcessSignature::from_env(env(&[
            (ENV_LSF_JOB_NAME, "prep"),
            (ENV_LSF_INDEX, "0"),
        ]));
        assert_eq!(single, Some(ProcessSignature::Standalone("prep".to_string())));
        assert_eq!(ProcessSignature::from_env(env(&[])), None);
    }

    #[test]
    fn test_reporter_from_env() {
        let reporter = ProcessReporter::from_env(
            env(&[
                (ENV_MONITORING_URL, "http://monitor:5000/"),
                (ENV_TASK_LABEL, "mc-1"),
                (ENV_PROCESS, "sim"),
                (ENV_HTCONDOR_INDEX, "2"),
            ]),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(reporter.url(), "http://monitor:5000/api/v0/task/mc-1/array/sim/3");
        assert!(ProcessReporter::from_env(env(&[(ENV_PROCESS, "sim")]), false).is_none());

        let prefixed = ProcessReporter::from_env(
            env(&[
                (ENV_MONITORING_URL, "http://monitor:5000"),
                (ENV_MONITORING_PREFIX, "/farm/v0"),
                (ENV_TASK_LABEL, "mc-1"),
                (ENV_PROCESS, "prep"),
            ]),
            false,
        )
        .unwrap()
        .unwrap();
        assert_eq!(prefixed.url(), "http://monitor:5000/farm/v0/task/mc-1/process/prep");
    }

    #[test]
    fn test_reporter_uses_configured_prefix() {
        let config = MonitoringConfig {
            address: Some("http://monitor:5000".to_string()),
            api_prefix: "/monitor/api".to_string(),
            ..Default::default()
        };
        let reporter = ProcessReporter::new(
            &config,
            "mc",
            ProcessSignature::Standalone("prep".to_string()),
            false,
        )
        .unwrap();
        assert_eq!(reporter.url(), "http://monitor:5000/monitor/api/task/mc/process/prep");

        let disabled = ProcessReporter::new(
            &MonitoringConfig::default(),
            "mc",
            ProcessSignature::Standalone("prep".to_string()),
            false,
        );
        assert!(matches!(disabled, Err(SchedError::MonitoringError(_))));
    }

    #[test]
    fn test_monitoring_env_variables() {
        let target = MonitoringEnv {
            url: "http://mon:5000".to_string(),
            api_prefix: None,
            task_label: "mc".to_string(),
        };
        let names: Vec<String> = target.variables("sim").into_iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec![ENV_MONITORING_URL, ENV_TASK_LABEL, ENV_PROCESS]);

        let prefixed = MonitoringEnv {
            api_prefix: Some("/farm/v0".to_string()),
            ..target
        };
        assert_eq!(
            prefixed.variables("sim")[1],
            (ENV_MONITORING_PREFIX.to_string(), "/farm/v0".to_string())
        );
    }

    #[test]
    fn test_should_proceed() {
        let stop = EventReply {
            status: 200,
            state: ProcessState::Active,
            keep_going: false,
        };
        let config = MonitoringConfig {
            address: Some("http://localhost:5000".to_string()),
            ..Default::default()
        };
        let polite = ProcessReporter::new(
            &config,
            "t",
            ProcessSignature::Standalone("p".to_string()),
            false,
        )
        .unwrap();
        assert!(!polite.should_proceed(&stop));
        assert!(polite.should_proceed(&EventReply {
            keep_going: true,
            ..stop
        }));

        let stubborn = ProcessReporter::new(
            &config,
            "t",
            ProcessSignature::Standalone("p".to_string()),
            true,
        )
        .unwrap();
        assert!(stubborn.should_proceed(&stop));
    }
}
