//! Shadow command: run a process and report it to the monitoring service.
//!
//! The child's standard output is echoed line by line. Lines matching the
//! capture pattern become heartbeats. When the server cannot be reached the
//! wrapper goes dormant and the child keeps running unobserved.

use std::process::Stdio;

use anyhow::{Context, Result};
use regex_lite::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use farmhand_sched::monitoring::{ENV_MONITORING_PREFIX, ENV_MONITORING_URL, ENV_TASK_LABEL};
use farmhand_sched::{MonitoringConfig, ProcessReporter, ProcessSignature};

/// Options of `farmhand shadow`.
#[derive(Debug, Clone, Default)]
pub struct ShadowOptions {
    pub capture: Option<String>,
    pub insist: bool,
    pub address: Option<String>,
    pub task: Option<String>,
    pub process: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Event {
    Started,
    Beat(Option<i64>, Option<i64>),
    Terminated(Option<i32>),
}

/// Connection to the monitoring service, if any.
struct Link {
    reporter: Option<ProcessReporter>,
}

impl Link {
    fn dormant() -> Self {
        Self { reporter: None }
    }

    /// Build from options, falling back to the batch environment.
    fn from_options<F>(options: &ShadowOptions, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let address = options.address.clone().or_else(|| lookup(ENV_MONITORING_URL));
        let task = options.task.clone().or_else(|| lookup(ENV_TASK_LABEL));
        let signature = match &options.process {
            Some(text) => Some(ProcessSignature::parse(text)?),
            None => ProcessSignature::from_env(&lookup),
        };

        let (Some(address), Some(task), Some(signature)) = (address, task, signature) else {
            info!("No monitoring target configured; running unobserved");
            return Ok(Self::dormant());
        };
        let mut config = MonitoringConfig {
            address: Some(address),
            ..Default::default()
        };
        if let Some(prefix) = lookup(ENV_MONITORING_PREFIX) {
            config.api_prefix = prefix;
        }
        match ProcessReporter::new(&config, &task, signature, options.insist) {
            Ok(reporter) => {
                info!(url = reporter.url(), "Reporting to monitoring");
                Ok(Self {
                    reporter: Some(reporter),
                })
            }
            Err(e) => {
                warn!("Monitoring client unavailable, running unobserved: {}", e);
                Ok(Self::dormant())
            }
        }
    }

    /// Send an event; returns whether the process should keep going.
    async fn report(&mut self, event: Event) -> bool {
        let Some(reporter) = &self.reporter else {
            return true;
        };
        let reply = match event {
            Event::Started => reporter.started().await,
            Event::Beat(current, upper) => reporter.beat(current, upper).await,
            Event::Terminated(code) => reporter.terminated(code).await,
        };
        let proceed = match reply {
            Ok(reply) => Some(reporter.should_proceed(&reply)),
            Err(e) => {
                warn!("Monitoring unreachable, going dormant: {}", e);
                None
            }
        };
        match proceed {
            Some(proceed) => proceed,
            None => {
                self.reporter = None;
                true
            }
        }
    }
}

/// Progress carried by a matching line: named groups `current` and `upper`.
pub fn progress(pattern: &Regex, line: &str) -> Option<(Option<i64>, Option<i64>)> {
    let captures = pattern.captures(line)?;
    let group = |name: &str| {
        captures
            .name(name)
            .and_then(|m| m.as_str().trim().parse::<i64>().ok())
    };
    Some((group("current"), group("upper")))
}

/// Execute the shadow command; returns the exit code to propagate.
pub async fn execute(options: ShadowOptions, command: &[String]) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .context("No command given to shadow")?;
    let capture = options
        .capture
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("Invalid --capture pattern")?;
    let mut link = Link::from_options(&options, |key| std::env::var(key).ok())?;

    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {program}"))?;
    let stdout = child.stdout.take().context("Child has no standard output")?;
    let mut lines = BufReader::new(stdout).lines();

    let mut stopped = !link.report(Event::Started).await;
    while !stopped {
        let Some(line) = lines.next_line().await? else {
            break;
        };
        println!("{line}");
        let Some((current, upper)) = capture.as_ref().and_then(|re| progress(re, &line)) else {
            continue;
        };
        stopped = !link.report(Event::Beat(current, upper)).await;
    }

    if stopped {
        warn!("Monitoring asked the process to stop; killing {}", program);
        child.kill().await?;
    }
    let status = child.wait().await?;
    let code = status.code();
    link.report(Event::Terminated(code)).await;

    Ok(code.unwrap_or(1))
}
