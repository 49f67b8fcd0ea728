//! Parsers for LSF command output.

use tracing::warn;

use crate::backend::{ActiveJobInfo, JobState};
use crate::error::{CommandOutput, SchedError, SchedResult};

/// Native state flag: the job may still change state.
pub const STATE_POLLABLE: u8 = 0x2;
/// Native state flag: LSF reports an error condition.
pub const STATE_ERROR: u8 = 0x1;
/// No flags: the job reached a terminal state.
pub const STATE_TERMINAL: u8 = 0x0;

/// Parsed `bsub` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LsfSubmitReply {
    pub job_id: String,
    pub queue: String,
}

fn parse_bsub_line(line: &str) -> Option<LsfSubmitReply> {
    let rest = line.trim().strip_prefix("Job <")?;
    let (job_id, rest) = rest.split_once('>')?;
    if job_id.is_empty() || !job_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rest = rest.strip_prefix(" is submitted to ")?;
    let rest = rest.strip_prefix("default ").unwrap_or(rest);
    let queue = rest.strip_prefix("queue <")?.strip_suffix(">.")?;
    if queue.is_empty() || queue.contains('>') {
        return None;
    }
    Some(LsfSubmitReply {
        job_id: job_id.to_string(),
        queue: queue.to_string(),
    })
}

/// Parse `bsub` output:
/// ```text
/// Job <1234> is submitted to default queue <normal>.
/// ```
pub fn parse_bsub_output(output: &CommandOutput) -> SchedResult<LsfSubmitReply> {
    output
        .stdout
        .lines()
        .find_map(parse_bsub_line)
        .ok_or_else(|| SchedError::submission("unexpected bsub reply", output.clone()))
}

/// Flags of a native state string.
pub fn lsf_state_flags(state: &str) -> u8 {
    match state {
        "PEND" | "RUN" | "WAIT" | "PSUSP" | "USUSP" | "SSUSP" => STATE_POLLABLE,
        "DONE" | "EXIT" => STATE_TERMINAL,
        _ => STATE_ERROR,
    }
}

/// Map an LSF state to the shared state enum.
pub fn parse_lsf_state(state: &str) -> JobState {
    match state {
        "PEND" | "WAIT" => JobState::Pending,
        "RUN" => JobState::Running,
        "PSUSP" | "USUSP" | "SSUSP" => JobState::Suspended,
        "DONE" => JobState::Done,
        "EXIT" => JobState::Failed,
        _ => JobState::Unknown,
    }
}

const SUBMIT_TIME_TOKENS: usize = 3;

fn is_job_id(token: &str) -> bool {
    let base = token.split_once('[').map_or(token, |(base, _)| base);
    !base.is_empty() && base.bytes().all(|b| b.is_ascii_digit())
}

/// Parse one `bjobs -noheader -wX` row.
///
/// Columns: `JOBID USER STAT QUEUE FROM_HOST EXEC_HOST JOB_NAME SUBMIT_TIME`,
/// the submit time spanning three tokens. Pending jobs leave the exec host
/// blank.
pub fn parse_bjobs_line(line: &str) -> Option<ActiveJobInfo> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let full = match tokens.len() {
        n if n >= 7 + SUBMIT_TIME_TOKENS => true,
        n if n == 6 + SUBMIT_TIME_TOKENS => false,
        _ => return None,
    };
    if !is_job_id(tokens[0]) || !tokens[2].bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }

    let (exec_hosts, name_at) = if full {
        let hosts = tokens[5]
            .split(':')
            .filter(|h| !h.is_empty() && *h != "-")
            .map(str::to_string)
            .collect();
        (hosts, 6)
    } else {
        (Vec::new(), 5)
    };
    let time_at = tokens.len() - SUBMIT_TIME_TOKENS;

    Some(ActiveJobInfo {
        id: tokens[0].to_string(),
        name: Some(tokens[name_at..time_at].join(" ")),
        state: parse_lsf_state(tokens[2]),
        native_state: tokens[2].to_string(),
        queue: Some(tokens[3].to_string()),
        user: Some(tokens[1].to_string()),
        exec_hosts,
        submitted: Some(tokens[time_at..].join(" ")),
    })
}

/// Parse a whole `bjobs` listing; unparsable lines are logged and skipped.
pub fn parse_bjobs_output(output: &str) -> Vec<ActiveJobInfo> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let row = parse_bjobs_line(line);
            if row.is_none() {
                warn!(line, "Unable to parse bjobs line");
            }
            row
        })
        .collect()
}

/// Whether a failed `bjobs` call only reports that no job matched.
pub fn is_not_found(output: &CommandOutput) -> bool {
    output.stderr.contains("is not found") || output.stdout.contains("is not found")
}

/// Whether a listed job id belongs to the queried one (array members
/// carry an `[index]` suffix).
pub fn listing_matches(query: &str, listed: &str) -> bool {
    listed == query
        || listed
            .strip_prefix(query)
            .is_some_and(|rest| rest.starts_with('['))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bsub_default_queue() {
        let out = CommandOutput::new("Job <1234> is submitted to default queue <normal>.\n", "", 0);
        let reply = parse_bsub_output(&out).unwrap();
        assert_eq!(reply.job_id, "1234");
        assert_eq!(reply.queue, "normal");
    }

    #[test]
    fn test_parse_bsub_explicit_queue() {
        let out = CommandOutput::new(
            "Warning: project not set\nJob <98> is submitted to queue <1nh>.\n",
            "",
            0,
        );
        let reply = parse_bsub_output(&out).unwrap();
        assert_eq!(reply.job_id, "98");
        assert_eq!(reply.queue, "1nh");
    }

    #[test]
    fn test_parse_bsub_malformed() {
        let out = CommandOutput::new("Job <abc> is submitted to queue <x>.\n", "", 0);
        let err = parse_bsub_output(&out).unwrap_err();
        match err {
            SchedError::SubmissionFailure { output, .. } => {
                assert!(output.stdout.contains("Job <abc>"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(parse_bsub_output(&CommandOutput::new("", "", 0)).is_err());
    }

    #[test]
    fn test_parse_bjobs_running_and_pending() {
        let listing = "\
1234    alice   RUN   normal     lxplus001   b6s12p1234  reco.sh    Oct 20 18:15
1235    alice   PEND  normal     lxplus001               sim[3]     Oct 20 18:16
";
        let rows = parse_bjobs_output(listing);
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].id, "1234");
        assert_eq!(rows[0].state, JobState::Running);
        assert_eq!(rows[0].exec_hosts, vec!["b6s12p1234".to_string()]);
        assert_eq!(rows[0].name.as_deref(), Some("reco.sh"));
        assert_eq!(rows[0].submitted.as_deref(), Some("Oct 20 18:15"));

        assert_eq!(rows[1].state, JobState::Pending);
        assert!(rows[1].exec_hosts.is_empty());
        assert_eq!(rows[1].name.as_deref(), Some("sim[3]"));
        assert_eq!(rows[1].queue.as_deref(), Some("normal"));
    }

    #[test]
    fn test_parse_bjobs_skips_garbage() {
        let listing = "\
JOBID   USER    STAT  QUEUE
1236 bob DONE short host1 host2 job Oct 21 09:00
";
        let rows = parse_bjobs_output(listing);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, JobState::Done);
    }

    #[test]
    fn test_state_mapping() {
        assert_eq!(parse_lsf_state("PEND"), JobState::Pending);
        assert_eq!(parse_lsf_state("WAIT"), JobState::Pending);
        assert_eq!(parse_lsf_state("SSUSP"), JobState::Suspended);
        assert_eq!(parse_lsf_state("EXIT"), JobState::Failed);
        assert_eq!(parse_lsf_state("UNKWN"), JobState::Unknown);
        assert_eq!(lsf_state_flags("USUSP"), STATE_POLLABLE);
        assert_eq!(lsf_state_flags("DONE"), STATE_TERMINAL);
        assert_eq!(lsf_state_flags("UNKWN") & STATE_ERROR, STATE_ERROR);
    }

    #[test]
    fn test_listing_matches() {
        assert!(listing_matches("1234", "1234"));
        assert!(listing_matches("1234", "1234[7]"));
        assert!(!listing_matches("1234", "12345"));
    }
}
