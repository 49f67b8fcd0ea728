//! Immutable job descriptions.
//!
//! A [`SubmissionSpec`] describes one job: its command, how many processes
//! it spawns, where its output goes and which other jobs must finish first.
//! Specs are built once through [`SubmissionSpecBuilder`] and shared by
//! reference (`Arc`) between the graph, the backends and the monitoring
//! client.
//!
//! # Implicit arrays
//!
//! Any command token may carry a list of alternatives instead of a single
//! literal. The cartesian product of every multi-valued token defines the
//! parallel instances of the job:
//!
//! ```rust
//! use farmhand_sched::{CommandToken, SubmissionSpec};
//!
//! let spec = SubmissionSpec::builder("reco")
//!     .arg("reco.sh")
//!     .arg(CommandToken::alternatives(["run1", "run2", "run3"]))
//!     .arg(CommandToken::alternatives(["--fast", "--full"]))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(spec.implicit_array_size(), 6);
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;

use crate::error::{SchedError, SchedResult};

/// A single command-line token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandToken {
    /// A plain argument.
    Literal(String),
    /// A set of alternatives, one per array instance.
    Alternatives(Vec<String>),
}

impl CommandToken {
    /// Create an alternatives token.
    pub fn alternatives<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandToken::Alternatives(values.into_iter().map(Into::into).collect())
    }

    /// Whether this token expands into more than one value.
    pub fn is_expanding(&self) -> bool {
        matches!(self, CommandToken::Alternatives(values) if values.len() > 1)
    }

    /// The single value of a non-expanding token.
    pub fn as_single(&self) -> Option<&str> {
        match self {
            CommandToken::Literal(value) => Some(value),
            CommandToken::Alternatives(values) if values.len() == 1 => Some(&values[0]),
            CommandToken::Alternatives(_) => None,
        }
    }

    /// Number of values this token takes across the array.
    pub fn cardinality(&self) -> usize {
        match self {
            CommandToken::Literal(_) => 1,
            CommandToken::Alternatives(values) => values.len(),
        }
    }
}

impl From<&str> for CommandToken {
    fn from(value: &str) -> Self {
        CommandToken::Literal(value.to_string())
    }
}

impl From<String> for CommandToken {
    fn from(value: String) -> Self {
        CommandToken::Literal(value)
    }
}

impl From<Vec<String>> for CommandToken {
    fn from(values: Vec<String>) -> Self {
        CommandToken::Alternatives(values)
    }
}

impl From<Vec<&str>> for CommandToken {
    fn from(values: Vec<&str>) -> Self {
        CommandToken::alternatives(values)
    }
}

impl fmt::Display for CommandToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandToken::Literal(value) => write!(f, "{value}"),
            CommandToken::Alternatives(values) => write!(f, "{{{}}}", values.join(",")),
        }
    }
}

/// Split a command string into literal tokens using shell quoting rules.
pub fn tokenize(command: &str) -> SchedResult<Vec<CommandToken>> {
    shlex::split(command)
        .map(|tokens| tokens.into_iter().map(CommandToken::Literal).collect())
        .ok_or_else(|| SchedError::InvalidCommand(format!("Cannot tokenize command: {command}")))
}

/// Immutable description of one job.
#[derive(Debug, Clone)]
pub struct SubmissionSpec {
    name: String,
    command: Vec<CommandToken>,
    stdin_script: Option<String>,
    process_count: u32,
    min_success: Option<u32>,
    stdout: Option<String>,
    stderr: Option<String>,
    dependencies: Vec<Arc<SubmissionSpec>>,
    backend_arguments: BTreeMap<String, String>,
}

impl SubmissionSpec {
    /// Start building a spec for the named job.
    pub fn builder(name: impl Into<String>) -> SubmissionSpecBuilder {
        SubmissionSpecBuilder::new(name)
    }

    /// Job name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command tokens.
    pub fn command(&self) -> &[CommandToken] {
        &self.command
    }

    /// Inline script used when no command is given.
    pub fn stdin_script(&self) -> Option<&str> {
        self.stdin_script.as_deref()
    }

    /// Explicit homogeneous replication count.
    pub fn process_count(&self) -> u32 {
        self.process_count
    }

    /// Minimal number of successful instances, for fault-tolerant arrays.
    pub fn min_success(&self) -> Option<u32> {
        self.min_success
    }

    /// Standard output path template.
    pub fn stdout(&self) -> Option<&str> {
        self.stdout.as_deref()
    }

    /// Standard error path template.
    pub fn stderr(&self) -> Option<&str> {
        self.stderr.as_deref()
    }

    /// Direct dependencies.
    pub fn dependencies(&self) -> &[Arc<SubmissionSpec>] {
        &self.dependencies
    }

    /// Backend-specific overrides.
    pub fn backend_arguments(&self) -> &BTreeMap<String, String> {
        &self.backend_arguments
    }

    /// Look up a single backend argument.
    pub fn backend_argument(&self, key: &str) -> Option<&str> {
        self.backend_arguments.get(key).map(String::as_str)
    }

    /// Product of the lengths of all multi-valued tokens (1 when there are none).
    pub fn implicit_array_size(&self) -> usize {
        self.command
            .iter()
            .filter(|t| t.is_expanding())
            .map(CommandToken::cardinality)
            .product()
    }

    /// Whether the command contains at least one multi-valued token.
    pub fn is_implicit_array(&self) -> bool {
        self.command.iter().any(CommandToken::is_expanding)
    }

    /// Total number of instances: process count times implicit array size.
    pub fn total_instances(&self) -> u64 {
        u64::from(self.process_count) * self.implicit_array_size() as u64
    }

    /// Whether the backend has to submit more than one instance.
    pub fn is_array(&self) -> bool {
        self.total_instances() > 1
    }

    /// Rows of the implicit array: one entry per combination, listing the
    /// chosen value of each multi-valued token in command order.
    pub fn array_rows(&self) -> Vec<Vec<String>> {
        let expanding: Vec<&Vec<String>> = self
            .command
            .iter()
            .filter_map(|t| match t {
                CommandToken::Alternatives(values) if values.len() > 1 => Some(values),
                _ => None,
            })
            .collect();
        if expanding.is_empty() {
            return Vec::new();
        }
        expanding
            .into_iter()
            .map(|values| values.iter().cloned())
            .multi_cartesian_product()
            .collect()
    }

    /// Whether a job with the given name is reachable through dependencies.
    pub fn depends_on_name(&self, name: &str) -> bool {
        let mut visited = HashSet::new();
        let mut stack: Vec<&Arc<SubmissionSpec>> = self.dependencies.iter().collect();
        while let Some(dep) = stack.pop() {
            if !visited.insert(Arc::as_ptr(dep)) {
                continue;
            }
            if dep.name == name {
                return true;
            }
            stack.extend(dep.dependencies.iter());
        }
        false
    }

    /// Copy of this spec with the dependency list cleared.
    pub fn without_dependencies(&self) -> Arc<SubmissionSpec> {
        Arc::new(SubmissionSpec {
            dependencies: Vec::new(),
            ..self.clone()
        })
    }

    /// Human-readable rendering of the command.
    pub fn command_display(&self) -> String {
        self.command.iter().map(ToString::to_string).join(" ")
    }
}

/// Builder for [`SubmissionSpec`].
#[derive(Debug)]
pub struct SubmissionSpecBuilder {
    name: String,
    command: Vec<CommandToken>,
    command_error: Option<String>,
    stdin_script: Option<String>,
    process_count: u32,
    min_success: Option<u32>,
    stdout: Option<String>,
    stderr: Option<String>,
    dependencies: Vec<Arc<SubmissionSpec>>,
    backend_arguments: BTreeMap<String, String>,
}

impl SubmissionSpecBuilder {
    /// Create a builder for the named job.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: Vec::new(),
            command_error: None,
            stdin_script: None,
            process_count: 1,
            min_success: None,
            stdout: None,
            stderr: None,
            dependencies: Vec::new(),
            backend_arguments: BTreeMap::new(),
        }
    }

    /// Replace the command with the given tokens.
    pub fn command<I, T>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<CommandToken>,
    {
        self.command = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the command with a shell-tokenized string.
    pub fn command_line(mut self, command: &str) -> Self {
        match tokenize(command) {
            Ok(tokens) => self.command = tokens,
            Err(e) => self.command_error = Some(e.to_string()),
        }
        self
    }

    /// Append a single token.
    pub fn arg(mut self, token: impl Into<CommandToken>) -> Self {
        self.command.push(token.into());
        self
    }

    /// Set the inline script submitted when the command is empty.
    pub fn stdin_script(mut self, script: impl Into<String>) -> Self {
        self.stdin_script = Some(script.into());
        self
    }

    /// Set the explicit replication count.
    pub fn process_count(mut self, count: u32) -> Self {
        self.process_count = count;
        self
    }

    /// Set the minimal number of successful instances.
    pub fn min_success(mut self, min_success: u32) -> Self {
        self.min_success = Some(min_success);
        self
    }

    /// Set the standard output path template.
    pub fn stdout(mut self, path: impl Into<String>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    /// Set the standard error path template.
    pub fn stderr(mut self, path: impl Into<String>) -> Self {
        self.stderr = Some(path.into());
        self
    }

    /// Add a dependency that must finish before this job starts.
    pub fn depends_on(mut self, dependency: Arc<SubmissionSpec>) -> Self {
        if !self
            .dependencies
            .iter()
            .any(|d| Arc::ptr_eq(d, &dependency))
        {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Set a backend-specific argument.
    pub fn backend_argument(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.backend_arguments.insert(key.into(), value.into());
        self
    }

    /// Merge a set of backend-specific arguments.
    pub fn backend_arguments<I, K, V>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.backend_arguments
            .extend(arguments.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Validate and build the submission spec.
    pub fn build(self) -> SchedResult<SubmissionSpec> {
        if self.name.is_empty() || self.name.chars().any(char::is_whitespace) {
            return Err(SchedError::InvalidCommand(format!(
                "Invalid job name: {:?}",
                self.name
            )));
        }
        if let Some(message) = self.command_error {
            return Err(SchedError::InvalidCommand(message));
        }
        if self.command.is_empty() && self.stdin_script.is_none() {
            return Err(SchedError::InvalidCommand(format!(
                "Job {} has neither a command nor an inline script",
                self.name
            )));
        }
        if let Some(token) = self.command.iter().find(|t| t.cardinality() == 0) {
            return Err(SchedError::InvalidCommand(format!(
                "Job {} has an empty alternatives token: {token}",
                self.name
            )));
        }
        if self.process_count == 0 {
            return Err(SchedError::InvalidCommand(format!(
                "Job {} must spawn at least one process",
                self.name
            )));
        }

        let spec = SubmissionSpec {
            name: self.name,
            command: self.command,
            stdin_script: self.stdin_script,
            process_count: self.process_count,
            min_success: self.min_success,
            stdout: self.stdout,
            stderr: self.stderr,
            dependencies: self.dependencies,
            backend_arguments: self.backend_arguments,
        };

        if let Some(min_success) = spec.min_success {
            if min_success == 0 || u64::from(min_success) > spec.total_instances() {
                return Err(SchedError::InvalidCommand(format!(
                    "Job {}: minimal success count {} outside 1..={}",
                    spec.name,
                    min_success,
                    spec.total_instances()
                )));
            }
        }

        if spec.depends_on_name(&spec.name) {
            return Err(SchedError::DependencyCycle { job: spec.name });
        }

        Ok(spec)
    }

    /// Validate, build and wrap the submission spec for sharing.
    pub fn build_shared(self) -> SchedResult<Arc<SubmissionSpec>> {
        self.build().map(Arc::new)
    }
}
