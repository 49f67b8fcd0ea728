//! HTCondor submit description and DAG file generation.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use tracing::error;

use crate::backend::{artifact_path, expand_macros};
use crate::error::{SchedError, SchedResult};
use crate::graph::DependencyGraph;
use crate::monitoring::MonitoringEnv;
use crate::spec::SubmissionSpec;

/// Backend argument overriding the submit description path.
pub const ARG_SUBMISSION_FILE: &str = "submissionFile";
/// Backend argument overriding the user log path.
pub const ARG_USER_LOG_FILE: &str = "userLogFile";
/// Prefix of backend arguments extending the environment block.
pub const ARG_ENV_PREFIX: &str = "env.";

/// Value of a submit description entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassAdValue {
    Scalar(String),
    /// Rendered space-joined.
    List(Vec<String>),
    /// Rendered as `"k=v k2=v2"`.
    Map(Vec<(String, String)>),
}

impl ClassAdValue {
    pub fn render(&self) -> String {
        match self {
            ClassAdValue::Scalar(value) => value.clone(),
            ClassAdValue::List(values) => values.join(" "),
            ClassAdValue::Map(entries) => {
                let body = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={}", quote_env_value(v)))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("\"{body}\"")
            }
        }
    }
}

impl From<&str> for ClassAdValue {
    fn from(value: &str) -> Self {
        ClassAdValue::Scalar(value.to_string())
    }
}

impl From<String> for ClassAdValue {
    fn from(value: String) -> Self {
        ClassAdValue::Scalar(value)
    }
}

fn needs_single_quotes(value: &str) -> bool {
    value.is_empty() || value.chars().any(|c| c.is_whitespace() || c == '\'')
}

// Environment values with whitespace are single-quoted; quotes of both
// kinds are doubled.
fn quote_env_value(value: &str) -> String {
    let escaped = value.replace('"', "\"\"");
    if needs_single_quotes(value) {
        format!("'{}'", escaped.replace('\'', "''"))
    } else {
        escaped
    }
}

/// Render an `arguments` value.
///
/// Plain arguments are space-joined. As soon as one argument holds
/// whitespace or quotes, the double-quoted syntax is used: arguments with
/// whitespace are single-quoted, embedded quotes are doubled.
pub fn render_arguments(args: &[String]) -> String {
    let plain = args
        .iter()
        .all(|a| !a.is_empty() && !a.chars().any(|c| c.is_whitespace() || c == '"' || c == '\''));
    if plain {
        return args.join(" ");
    }
    let body = args
        .iter()
        .map(|a| {
            let escaped = a.replace('"', "\"\"");
            if needs_single_quotes(a) {
                format!("'{}'", escaped.replace('\'', "''"))
            } else {
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    format!("\"{body}\"")
}

/// Final `queue` statement of a submit description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDirective {
    /// Processes per row (or in total without rows).
    pub count: u32,
    /// Item variable names bound by each row.
    pub vars: Vec<String>,
    /// One row per implicit-array combination.
    pub rows: Vec<Vec<String>>,
}

impl QueueDirective {
    /// `queue N`.
    pub fn count(count: u32) -> Self {
        Self {
            count,
            vars: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Number of jobs the directive queues.
    pub fn job_count(&self) -> u64 {
        let rows = if self.rows.is_empty() { 1 } else { self.rows.len() };
        u64::from(self.count) * rows as u64
    }

    pub fn render(&self) -> String {
        if self.rows.is_empty() {
            return format!("queue {}", self.count);
        }
        let mut out = format!("queue {} {} from (\n", self.count, self.vars.join(","));
        for row in &self.rows {
            out.push_str(&row.join(" "));
            out.push('\n');
        }
        out.push(')');
        out
    }
}

/// Ordered `key = value` entries followed by the queue directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitDescription {
    entries: Vec<(String, ClassAdValue)>,
    queue: QueueDirective,
}

impl SubmitDescription {
    pub fn new(queue: QueueDirective) -> Self {
        Self {
            entries: Vec::new(),
            queue,
        }
    }

    /// Set a key, replacing its value in place if already present.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ClassAdValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ClassAdValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn queue(&self) -> &QueueDirective {
        &self.queue
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            let _ = writeln!(out, "{key} = {}", value.render());
        }
        out.push_str(&self.queue.render());
        out.push('\n');
        out
    }
}

/// Inputs of [`compile_description`] that come from the adapter.
#[derive(Debug, Clone)]
pub struct CompileContext<'a> {
    pub work_dir: &'a Path,
    pub tag: Option<&'a str>,
    pub defaults: &'a BTreeMap<String, String>,
    pub job_index_var: &'a str,
    pub monitoring: Option<MonitoringEnv>,
}

/// A compiled job, ready to be written and submitted.
#[derive(Debug, Clone)]
pub struct CompiledJob {
    pub description: SubmitDescription,
    pub submission_path: PathBuf,
    pub user_log: PathBuf,
    /// Generated executable for inline-script jobs.
    pub script: Option<(PathBuf, String)>,
    /// Output path with HTCondor macros left in place.
    pub stdout: String,
    pub stderr: String,
}

/// Path macros understood in output templates.
pub fn htcondor_macros(tag: Option<&str>) -> [(&'static str, String); 3] {
    [
        ("jIndex", "$(Process)".to_string()),
        ("jID", "$(Cluster).$(Process)".to_string()),
        ("subTag", tag.unwrap_or_default().to_string()),
    ]
}

fn expand(template: &str, macros: &[(&'static str, String)]) -> String {
    let pairs: Vec<(&str, &str)> = macros.iter().map(|(k, v)| (*k, v.as_str())).collect();
    expand_macros(template, &pairs)
}

/// Compile one spec into a submit description.
///
/// Multi-valued command tokens become `$(ItemK)` placeholders and their
/// cartesian product becomes the rows of the queue directive.
pub fn compile_description(spec: &SubmissionSpec, ctx: &CompileContext<'_>) -> SchedResult<CompiledJob> {
    let name = spec.name();
    let macros = htcondor_macros(ctx.tag);

    let rows = spec.array_rows();
    let queue = if rows.is_empty() {
        QueueDirective::count(spec.process_count())
    } else {
        let width = rows.first().map_or(0, Vec::len);
        QueueDirective {
            count: spec.process_count(),
            vars: (0..width).map(|i| format!("Item{i}")).collect(),
            rows,
        }
    };
    let mut description = SubmitDescription::new(queue);

    for (key, value) in ctx.defaults {
        description.set(key.clone(), value.as_str());
    }

    let mut script = None;
    match spec.command().split_first() {
        Some((executable, args)) => {
            let executable = executable.as_single().ok_or_else(|| {
                SchedError::InvalidCommand(format!(
                    "job {name}: the executable cannot be a list of alternatives"
                ))
            })?;
            description.set("executable", executable);

            let mut item = 0usize;
            let args: Vec<String> = args
                .iter()
                .map(|token| match token.as_single() {
                    Some(value) => value.to_string(),
                    None => {
                        let placeholder = format!("$(Item{item})");
                        item += 1;
                        placeholder
                    }
                })
                .collect();
            if !args.is_empty() {
                description.set("arguments", render_arguments(&args));
            }
        }
        None => {
            let body = spec.stdin_script().ok_or_else(|| {
                SchedError::InvalidCommand(format!("job {name}: no command and no script"))
            })?;
            let path = artifact_path(ctx.work_dir, name, ctx.tag, "sh");
            description.set("executable", path.display().to_string());
            script = Some((path, body.to_string()));
        }
    }

    let stdout = match spec.stdout() {
        Some(template) => expand(template, &macros),
        None => artifact_path(ctx.work_dir, name, ctx.tag, "$(Cluster).$(Process).out")
            .display()
            .to_string(),
    };
    let stderr = match spec.stderr() {
        Some(template) => expand(template, &macros),
        None => artifact_path(ctx.work_dir, name, ctx.tag, "$(Cluster).$(Process).err")
            .display()
            .to_string(),
    };
    let user_log = spec
        .backend_argument(ARG_USER_LOG_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|| artifact_path(ctx.work_dir, name, ctx.tag, "log"));
    let submission_path = spec
        .backend_argument(ARG_SUBMISSION_FILE)
        .map(PathBuf::from)
        .unwrap_or_else(|| artifact_path(ctx.work_dir, name, ctx.tag, "sub"));

    description.set("output", stdout.clone());
    description.set("error", stderr.clone());
    description.set("log", user_log.display().to_string());

    let index_value = if spec.total_instances() == 1 {
        "SINGLE"
    } else {
        "$(Process)"
    };
    let mut environment = vec![(ctx.job_index_var.to_string(), index_value.to_string())];
    if let Some(monitoring) = &ctx.monitoring {
        environment.extend(monitoring.variables(name));
    }
    for (key, value) in spec.backend_arguments() {
        let Some(var) = key.strip_prefix(ARG_ENV_PREFIX) else {
            continue;
        };
        if var == ctx.job_index_var {
            error!(
                job = name,
                variable = var,
                value = index_value,
                "Job index variable cannot be overridden"
            );
            continue;
        }
        match environment.iter_mut().find(|(k, _)| k == var) {
            Some(entry) => entry.1 = value.clone(),
            None => environment.push((var.to_string(), value.clone())),
        }
    }
    description.set("environment", ClassAdValue::Map(environment));

    for (key, value) in spec.backend_arguments() {
        if key == ARG_SUBMISSION_FILE || key == ARG_USER_LOG_FILE || key.starts_with(ARG_ENV_PREFIX) {
            continue;
        }
        description.set(key.clone(), expand(value, &macros));
    }

    Ok(CompiledJob {
        description,
        submission_path,
        user_log,
        script,
        stdout,
        stderr,
    })
}

/// Render a DAGMan file: `JOB` lines in dependency order, then one
/// `PARENT ... CHILD ...` line per job with dependents.
pub fn render_dag(graph: &DependencyGraph, submission_paths: &FxHashMap<String, PathBuf>) -> SchedResult<String> {
    let mut out = String::new();
    let order: Vec<_> = graph.topological_order().collect();

    for spec in &order {
        let path = submission_paths.get(spec.name()).ok_or_else(|| {
            SchedError::InvalidGraph(format!("no submit description for job {}", spec.name()))
        })?;
        let _ = writeln!(out, "JOB {} {}", spec.name(), path.display());
    }
    for spec in &order {
        let children = graph.dependents(spec.name());
        if children.is_empty() {
            continue;
        }
        let children: Vec<&str> = children.iter().map(|c| c.name()).collect();
        let _ = writeln!(out, "PARENT {} CHILD {}", spec.name(), children.join(" "));
    }
    Ok(out)
}
