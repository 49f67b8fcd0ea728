//! YAML pipeline manifests.
//!
//! A manifest names its jobs and their dependencies:
//!
//! ```yaml
//! label: mc-production
//! jobs:
//!   - name: prep
//!     command: prep.sh --init
//!   - name: sim
//!     command: [sim.sh, [run1, run2, run3]]
//!     processes: 2
//!     minSuccess: 5
//!     dependsOn: [prep]
//!     args:
//!       q: long
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::graph::DependencyGraph;
use crate::spec::{CommandToken, SubmissionSpec};

/// A job command as written in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestCommand {
    /// Shell-tokenized string.
    Line(String),
    /// Explicit tokens; a nested list is a set of alternatives.
    Tokens(Vec<ManifestToken>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ManifestToken {
    Literal(String),
    Alternatives(Vec<String>),
}

impl From<&ManifestToken> for CommandToken {
    fn from(token: &ManifestToken) -> Self {
        match token {
            ManifestToken::Literal(value) => CommandToken::Literal(value.clone()),
            ManifestToken::Alternatives(values) => CommandToken::Alternatives(values.clone()),
        }
    }
}

/// One job entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestJob {
    pub name: String,
    #[serde(default)]
    pub command: Option<ManifestCommand>,
    /// Inline script, used when there is no command.
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default = "default_processes")]
    pub processes: u32,
    #[serde(default)]
    pub min_success: Option<u32>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

fn default_processes() -> u32 {
    1
}

/// A pipeline read from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineManifest {
    #[serde(default)]
    pub label: Option<String>,
    pub jobs: Vec<ManifestJob>,
}

enum Visit {
    InProgress,
    Built(Arc<SubmissionSpec>),
}

impl PipelineManifest {
    pub fn from_yaml(text: &str) -> SchedResult<Self> {
        serde_yaml_ng::from_str(text)
            .map_err(|e| SchedError::InvalidCommand(format!("invalid pipeline manifest: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> SchedResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&text)
    }

    /// Build the dependency graph, labelled `label` or the manifest's own
    /// label.
    pub fn build_graph(&self, label: Option<&str>) -> SchedResult<DependencyGraph> {
        let mut by_name: FxHashMap<&str, &ManifestJob> = FxHashMap::default();
        for job in &self.jobs {
            if by_name.insert(job.name.as_str(), job).is_some() {
                return Err(SchedError::DuplicateJobName(job.name.clone()));
            }
        }

        let mut visits: FxHashMap<&str, Visit> = FxHashMap::default();
        let mut roots = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            roots.push(resolve(job, &by_name, &mut visits)?);
        }

        // Jobs nobody depends on are the roots; their closures cover the rest.
        let needed: FxHashSet<&str> = self
            .jobs
            .iter()
            .flat_map(|job| job.depends_on.iter().map(String::as_str))
            .collect();
        let roots = roots
            .into_iter()
            .filter(|spec| !needed.contains(spec.name()));

        let label = label
            .map(str::to_string)
            .or_else(|| self.label.clone())
            .unwrap_or_else(|| "pipeline".to_string());
        let graph = DependencyGraph::from_roots(label, roots)?;
        debug!(jobs = graph.len(), label = graph.label(), "Pipeline graph built");
        Ok(graph)
    }
}

fn resolve<'m>(
    job: &'m ManifestJob,
    by_name: &FxHashMap<&'m str, &'m ManifestJob>,
    visits: &mut FxHashMap<&'m str, Visit>,
) -> SchedResult<Arc<SubmissionSpec>> {
    match visits.get(job.name.as_str()) {
        Some(Visit::Built(spec)) => return Ok(Arc::clone(spec)),
        Some(Visit::InProgress) => {
            return Err(SchedError::DependencyCycle {
                job: job.name.clone(),
            });
        }
        None => {}
    }
    visits.insert(job.name.as_str(), Visit::InProgress);

    let mut builder = SubmissionSpec::builder(job.name.as_str())
        .process_count(job.processes)
        .backend_arguments(job.args.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    match &job.command {
        Some(ManifestCommand::Line(line)) => builder = builder.command_line(line),
        Some(ManifestCommand::Tokens(tokens)) => {
            builder = builder.command(tokens.iter().map(CommandToken::from));
        }
        None => {}
    }
    if let Some(script) = &job.script {
        builder = builder.stdin_script(script.as_str());
    }
    if let Some(min) = job.min_success {
        builder = builder.min_success(min);
    }
    if let Some(stdout) = &job.stdout {
        builder = builder.stdout(stdout.as_str());
    }
    if let Some(stderr) = &job.stderr {
        builder = builder.stderr(stderr.as_str());
    }

    for dep_name in &job.depends_on {
        let dep = by_name.get(dep_name.as_str()).ok_or_else(|| {
            SchedError::InvalidCommand(format!(
                "job {} depends on unknown job {}",
                job.name, dep_name
            ))
        })?;
        builder = builder.depends_on(resolve(dep, by_name, visits)?);
    }

    let spec = builder.build_shared()?;
    visits.insert(job.name.as_str(), Visit::Built(Arc::clone(&spec)));
    Ok(spec)
}
