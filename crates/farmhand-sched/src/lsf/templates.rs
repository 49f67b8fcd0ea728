//! `bsub` argument composition and job-array dispatch scripts.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::backend::{artifact_path, expand_macros};
use crate::error::{SchedError, SchedResult};
use crate::monitoring::MonitoringEnv;
use crate::spec::SubmissionSpec;

/// Options the adapter always sets itself.
pub const RESERVED_OPTIONS: [&str; 5] = ["J", "oo", "eo", "o", "e"];

/// One `bsub` option; `value: None` is a bare flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BsubOption {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl BsubOption {
    pub fn new(name: impl Into<String>, value: Option<&str>) -> Self {
        Self {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }
}

/// Path macros understood in output templates.
pub fn lsf_macros(tag: Option<&str>) -> [(&'static str, &str); 3] {
    [("jIndex", "%I"), ("jID", "%J"), ("subTag", tag.unwrap_or_default())]
}

/// A ready `bsub` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BsubCommand {
    pub argv: Vec<String>,
    /// Inline script fed to `bsub` on stdin.
    pub stdin: Option<String>,
    /// Name passed to `-J`, with the `[1-N]` array suffix when needed.
    pub job_name: String,
    /// Number of array members (1 for a plain job).
    pub array_size: u64,
    /// Output path with `%J`/`%I` left in place.
    pub stdout: String,
    pub stderr: String,
    /// Generated dispatch script for implicit arrays.
    pub array_script: Option<(PathBuf, String)>,
}

fn merge_options(defaults: &[BsubOption], spec: &SubmissionSpec) -> Vec<BsubOption> {
    let mut options: Vec<BsubOption> = defaults.to_vec();
    for (key, value) in spec.backend_arguments() {
        let name = key.trim_start_matches('-');
        let value = (!value.is_empty()).then_some(value.as_str());
        match options.iter_mut().find(|o| o.name == name) {
            Some(option) => option.value = value.map(str::to_string),
            None => options.push(BsubOption::new(name, value)),
        }
    }
    options.retain(|option| {
        let reserved = RESERVED_OPTIONS.contains(&option.name.as_str());
        if reserved {
            warn!(
                job = spec.name(),
                option = %option.name,
                value = option.value.as_deref().unwrap_or(""),
                "bsub option is set by the adapter and will be ignored"
            );
        }
        !reserved
    });
    if !options.iter().any(|o| o.name == "q") {
        warn!(job = spec.name(), "LSF queue is not specified; the default queue will be used");
    }
    options
}

/// Append the monitoring variables to the `-env` option, creating it if needed.
///
/// LSF reads `-env` as a comma-separated list; a leading `all` keeps the
/// submission environment.
fn inject_environment(options: &mut Vec<BsubOption>, variables: &[(String, String)]) {
    let assignments: Vec<String> = variables.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let assignments = assignments.join(", ");
    match options.iter_mut().find(|o| o.name == "env") {
        Some(option) => {
            let value = match option.value.as_deref().map(str::trim) {
                None | Some("") | Some("none") => format!("all, {assignments}"),
                Some(existing) => format!("{existing}, {assignments}"),
            };
            option.value = Some(value);
        }
        None => options.push(BsubOption::new("env", Some(&format!("all, {assignments}")))),
    }
}

/// Compose the `bsub` invocation for a spec.
///
/// Configured defaults come first, per-job backend arguments override them
/// in place, then `-J`, `-oo`, `-eo` and the target follow. Monitoring
/// variables travel in `-env`.
pub fn build_bsub_command(
    spec: &SubmissionSpec,
    bsub: &str,
    defaults: &[BsubOption],
    work_dir: &Path,
    tag: Option<&str>,
    monitoring: Option<&MonitoringEnv>,
) -> SchedResult<BsubCommand> {
    let name = spec.name();
    let macros = lsf_macros(tag);

    let stdout = match spec.stdout() {
        Some(template) => expand_macros(template, &macros),
        None => artifact_path(work_dir, name, tag, "%J.%I.out").display().to_string(),
    };
    let stderr = match spec.stderr() {
        Some(template) => expand_macros(template, &macros),
        None => artifact_path(work_dir, name, tag, "%J.%I.err").display().to_string(),
    };

    let array_size = spec.total_instances();
    let job_name = if array_size > 1 {
        format!("{name}[1-{array_size}]")
    } else {
        name.to_string()
    };

    let mut options = merge_options(defaults, spec);
    if let Some(monitoring) = monitoring {
        inject_environment(&mut options, &monitoring.variables(name));
    }

    let mut argv = vec![bsub.to_string()];
    for option in options {
        argv.push(format!("-{}", option.name));
        if let Some(value) = option.value {
            argv.push(expand_macros(&value, &macros));
        }
    }
    argv.extend([
        "-J".to_string(),
        job_name.clone(),
        "-oo".to_string(),
        stdout.clone(),
        "-eo".to_string(),
        stderr.clone(),
    ]);

    let mut stdin = None;
    let mut array_script = None;
    if spec.is_implicit_array() {
        let path = artifact_path(work_dir, name, tag, "lsf.sh");
        argv.push(path.display().to_string());
        array_script = Some((path, render_array_script(spec)?));
    } else if spec.command().is_empty() {
        let script = spec.stdin_script().ok_or_else(|| {
            SchedError::InvalidCommand(format!("job {name}: no command and no script"))
        })?;
        stdin = Some(script.to_string());
    } else {
        for token in spec.command() {
            let value = token.as_single().ok_or_else(|| {
                SchedError::InvalidCommand(format!("job {name}: unexpanded token {token}"))
            })?;
            argv.push(value.to_string());
        }
    }

    Ok(BsubCommand {
        argv,
        stdin,
        job_name,
        array_size,
        stdout,
        stderr,
        array_script,
    })
}

fn quote(word: &str) -> SchedResult<String> {
    shlex::try_quote(word)
        .map(|quoted| quoted.into_owned())
        .map_err(|e| SchedError::InvalidCommand(format!("cannot quote {word:?}: {e}")))
}

/// Render the bash script dispatching array members to argument rows.
///
/// LSF only tells a member its `LSB_JOBINDEX` (1-based), so every
/// combination of the implicit array is spelled out and selected by index.
/// Process replication cycles through the rows.
pub fn render_array_script(spec: &SubmissionSpec) -> SchedResult<String> {
    let rows = spec.array_rows();
    let mut out = String::from("#!/bin/bash\n");
    let _ = writeln!(
        out,
        "# Dispatch script for LSF job array {}: {} argument rows.",
        spec.name(),
        rows.len()
    );
    let _ = writeln!(out, "case $(( (LSB_JOBINDEX - 1) % {} )) in", rows.len().max(1));

    for (n, row) in rows.iter().enumerate() {
        let mut values = row.iter();
        let mut words = Vec::with_capacity(spec.command().len());
        for token in spec.command() {
            let word = match token.as_single() {
                Some(value) => value,
                None => values.next().map(String::as_str).ok_or_else(|| {
                    SchedError::InvalidCommand(format!(
                        "job {}: array row {n} is shorter than the command",
                        spec.name()
                    ))
                })?,
            };
            words.push(quote(word)?);
        }
        let _ = writeln!(out, "  {n}) exec {} ;;", words.join(" "));
    }

    out.push_str("  *) echo \"unexpected LSB_JOBINDEX=$LSB_JOBINDEX\" >&2; exit 1 ;;\n");
    out.push_str("esac\n");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CommandToken;

    fn defaults() -> Vec<BsubOption> {
        vec![
            BsubOption::new("q", Some("normal")),
            BsubOption::new("W", Some("60")),
        ]
    }

    #[test]
    fn test_plain_job() {
        let spec = SubmissionSpec::builder("hello")
            .command_line("/bin/echo hi")
            .stdout("/logs/{jID}.{jIndex}.out")
            .backend_argument("q", "long")
            .backend_argument("J", "ignored")
            .backend_argument("x", "")
            .build()
            .unwrap();
        let cmd =
            build_bsub_command(&spec, "bsub", &defaults(), Path::new("/w"), None, None).unwrap();

        assert_eq!(
            cmd.argv,
            vec![
                "bsub", "-q", "long", "-W", "60", "-x", "-J", "hello", "-oo", "/logs/%J.%I.out",
                "-eo", "/w/hello.%J.%I.err", "/bin/echo", "hi",
            ]
        );
        assert_eq!(cmd.array_size, 1);
        assert!(cmd.stdin.is_none());
    }

    #[test]
    fn test_inline_script_on_stdin() {
        let spec = SubmissionSpec::builder("inline")
            .stdin_script("echo hi\n")
            .process_count(3)
            .build()
            .unwrap();
        let cmd = build_bsub_command(&spec, "bsub", &[], Path::new("/w"), Some("t"), None)
            .unwrap();
        assert_eq!(cmd.stdin.as_deref(), Some("echo hi\n"));
        assert_eq!(cmd.job_name, "inline[1-3]");
        assert_eq!(cmd.stdout, "/w/inline.t.%J.%I.out");
        assert_eq!(cmd.argv.last().map(String::as_str), Some("/w/inline.t.%J.%I.err"));
    }

    #[test]
    fn test_implicit_array_script() {
        let spec = SubmissionSpec::builder("reco")
            .arg("reco.sh")
            .arg(CommandToken::alternatives(["run 1", "run2", "run3"]))
            .arg(CommandToken::alternatives(["--fast", "--full"]))
            .build()
            .unwrap();
        let cmd =
            build_bsub_command(&spec, "bsub", &defaults(), Path::new("/w"), None, None).unwrap();

        assert_eq!(cmd.job_name, "reco[1-6]");
        assert_eq!(cmd.argv.last().map(String::as_str), Some("/w/reco.lsf.sh"));
        let (path, script) = cmd.array_script.unwrap();
        assert_eq!(path, PathBuf::from("/w/reco.lsf.sh"));
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("case $(( (LSB_JOBINDEX - 1) % 6 )) in\n"));
        assert!(script.contains("  0) exec reco.sh 'run 1' --fast ;;\n"));
        assert!(script.contains("  5) exec reco.sh run3 --full ;;\n"));
        assert!(script.ends_with("esac\n"));
    }

    fn monitoring() -> MonitoringEnv {
        MonitoringEnv {
            url: "http://mon:5000".into(),
            api_prefix: None,
            task_label: "pipe".into(),
        }
    }

    #[test]
    fn test_monitoring_variables_in_env_option() {
        let spec = SubmissionSpec::builder("sim")
            .command_line("sim.sh")
            .build()
            .unwrap();
        let monitoring = monitoring();
        let cmd = build_bsub_command(
            &spec,
            "bsub",
            &defaults(),
            Path::new("/w"),
            None,
            Some(&monitoring),
        )
        .unwrap();

        assert_eq!(
            cmd.argv,
            vec![
                "bsub",
                "-q",
                "normal",
                "-W",
                "60",
                "-env",
                "all, FARMHAND_MONITORING_URL=http://mon:5000, FARMHAND_TASK_LABEL=pipe, \
                 FARMHAND_PROCESS=sim",
                "-J",
                "sim",
                "-oo",
                "/w/sim.%J.%I.out",
                "-eo",
                "/w/sim.%J.%I.err",
                "sim.sh",
            ]
        );
    }

    #[test]
    fn test_monitoring_variables_extend_user_env() {
        let spec = SubmissionSpec::builder("sim")
            .command_line("sim.sh")
            .backend_argument("env", "all, SEED=7")
            .build()
            .unwrap();
        let monitoring = MonitoringEnv {
            api_prefix: Some("/farm/v0".into()),
            ..monitoring()
        };
        let cmd =
            build_bsub_command(&spec, "bsub", &[], Path::new("/w"), None, Some(&monitoring)).unwrap();

        let env = cmd.argv.iter().position(|arg| arg == "-env").unwrap();
        assert_eq!(
            cmd.argv[env + 1],
            "all, SEED=7, FARMHAND_MONITORING_URL=http://mon:5000, \
             FARMHAND_MONITORING_PREFIX=/farm/v0, FARMHAND_TASK_LABEL=pipe, FARMHAND_PROCESS=sim"
        );
        assert_eq!(cmd.argv.iter().filter(|arg| *arg == "-env").count(), 1);
    }
}
