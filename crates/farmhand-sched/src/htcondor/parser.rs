//! Parsers for HTCondor command output.

use std::collections::BTreeMap;

use tracing::debug;

use crate::backend::{ActiveJobInfo, ClusterProc, JobId, JobState};
use crate::error::{CommandOutput, SchedError, SchedResult};

/// Description under which `condor_submit_dag` reports the DAGMan log.
pub const DAGMAN_LOG: &str = "Log of the life of condor_dagman itself";
/// Description under which `condor_submit_dag` reports the debugging log.
pub const DAGMAN_OUT: &str = "Log of DAGMan debugging messages";
/// Description under which `condor_submit_dag` reports library errors.
pub const DAGMAN_LIB_ERR: &str = "Log of HTCondor library error messages";

/// Parse `condor_submit -terse` output.
///
/// The reply is a `<begin> - <end>` pair of `cluster.proc` identifiers:
/// ```text
/// 745.0 - 745.4
/// ```
/// Equal ends denote a single job.
pub fn parse_submit_output(output: &CommandOutput) -> SchedResult<JobId> {
    for line in output.stdout.lines() {
        let Some((begin, end)) = line.trim().split_once(" - ") else {
            continue;
        };
        if let (Some(begin), Some(end)) = (ClusterProc::parse(begin), ClusterProc::parse(end)) {
            if begin.cluster != end.cluster || begin.proc_id > end.proc_id {
                return Err(SchedError::submission(
                    format!("inconsistent job range {begin} - {end}"),
                    output.clone(),
                ));
            }
            return Ok(JobId::range(begin, end));
        }
    }
    Err(SchedError::submission(
        "unexpected condor_submit reply",
        output.clone(),
    ))
}

/// Parsed `condor_submit_dag` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagSubmitReply {
    /// `<description> : <value>` pairs.
    pub descriptions: BTreeMap<String, String>,
    /// Number of jobs reported as submitted.
    pub job_count: u32,
    /// Cluster of the DAGMan job.
    pub cluster: u64,
}

/// Parse `condor_submit_dag` output.
///
/// ```text
/// File for submitting this DAG to HTCondor           : diamond.dag.condor.sub
/// Log of the life of condor_dagman itself          : diamond.dag.dagman.log
///
/// Submitting job(s).
/// 1 job(s) submitted to cluster 1062.
/// ```
pub fn parse_dag_submit_output(output: &CommandOutput) -> SchedResult<DagSubmitReply> {
    let mut descriptions = BTreeMap::new();
    let mut confirmation = None;

    for line in output.stdout.lines() {
        let line = line.trim();
        if let Some((count, cluster)) = line
            .strip_suffix('.')
            .and_then(|l| l.split_once(" job(s) submitted to cluster "))
        {
            if let (Ok(count), Ok(cluster)) = (count.trim().parse(), cluster.trim().parse()) {
                confirmation = Some((count, cluster));
                continue;
            }
        }
        if let Some((description, value)) = line.split_once(" : ") {
            let (description, value) = (description.trim(), value.trim());
            if !description.is_empty() && !value.is_empty() {
                descriptions.insert(description.to_string(), value.to_string());
            }
        }
    }

    if descriptions.is_empty() {
        return Err(SchedError::submission(
            "no file descriptions in condor_submit_dag reply",
            output.clone(),
        ));
    }
    let Some((job_count, cluster)) = confirmation else {
        return Err(SchedError::submission(
            "no submission confirmation in condor_submit_dag reply",
            output.clone(),
        ));
    };

    Ok(DagSubmitReply {
        descriptions,
        job_count,
        cluster,
    })
}

/// Map an HTCondor state letter to the shared state enum.
///
/// - I: idle
/// - R, <, >, E: running or transferring
/// - H: held
/// - S: suspended
/// - C: completed
/// - X: removed
pub fn parse_condor_state(code: &str) -> JobState {
    match code {
        "I" => JobState::Pending,
        "R" | "<" | ">" | "E" => JobState::Running,
        "H" | "S" => JobState::Suspended,
        "C" => JobState::Done,
        "X" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

const STATE_COLUMN: usize = 5;
const CMD_COLUMN: usize = 8;

/// Parse one row of `condor_q -nobatch` or `condor_history` output.
///
/// Both tools share the leading layout
/// `ID OWNER SUBMITTED(date time) RUN_TIME ST` and print the command from
/// the ninth column on.
fn parse_listing_row(line: &str) -> Option<ActiveJobInfo> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() <= STATE_COLUMN {
        return None;
    }
    ClusterProc::parse(tokens[0])?;
    let native_state = tokens[STATE_COLUMN];
    if native_state.chars().count() != 1 {
        return None;
    }
    let name = tokens.get(CMD_COLUMN..).map(|cmd| cmd.join(" "));

    Some(ActiveJobInfo {
        id: tokens[0].to_string(),
        name: name.filter(|n| !n.is_empty()),
        state: parse_condor_state(native_state),
        native_state: native_state.to_string(),
        queue: None,
        user: Some(tokens[1].to_string()),
        exec_hosts: Vec::new(),
        submitted: Some(format!("{} {}", tokens[2], tokens[3])),
    })
}

/// Parse a `condor_q -nobatch` or `condor_history` listing.
///
/// Headers, blank lines and summaries are skipped.
pub fn parse_listing_output(output: &str) -> Vec<ActiveJobInfo> {
    output
        .lines()
        .filter_map(|line| {
            let row = parse_listing_row(line);
            if row.is_none() && !line.trim().is_empty() {
                debug!(line, "Skipping non-job line in HTCondor listing");
            }
            row
        })
        .collect()
}

/// Whether a listed job belongs to the identifier.
pub fn listing_matches(id: &JobId, listed: &str) -> bool {
    let Some(listed) = ClusterProc::parse(listed) else {
        return false;
    };
    match id {
        JobId::Single(single) => *single == listed,
        JobId::Range { begin, end } => {
            listed.cluster == begin.cluster
                && listed.proc_id >= begin.proc_id
                && listed.proc_id <= end.proc_id
        }
        JobId::Token(token) => token
            .parse::<u64>()
            .is_ok_and(|cluster| cluster == listed.cluster),
    }
}

/// Outcome of one `condor_wait` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReply {
    /// All jobs in the log completed.
    Completed,
    /// The `-wait` budget expired; benign.
    TimeExpired,
    /// Anything else.
    Failed,
}

/// Classify a `condor_wait` result.
pub fn classify_wait_output(output: &CommandOutput) -> WaitReply {
    match output.exit_code {
        Some(0) => WaitReply::Completed,
        Some(1) if output.stdout.contains("Time expired.") => WaitReply::TimeExpired,
        _ => WaitReply::Failed,
    }
}
