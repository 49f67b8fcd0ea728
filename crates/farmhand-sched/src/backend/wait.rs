//! Bounded polling loop shared by the adapters.

use std::future::Future;

use tracing::{info, warn};

use super::{JobState, WaitOutcome, WaitPolicy};
use crate::error::{CommandOutput, SchedError, SchedResult};

/// Result of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Poll {
    /// The job left the pollable states.
    Settled(JobState),
    /// Still pending, running or suspended.
    Waiting(JobState),
    /// The backend no longer lists the job.
    Vanished,
}

fn is_transient(err: &SchedError) -> bool {
    matches!(
        err,
        SchedError::CommandError { .. }
            | SchedError::Timeout(_)
            | SchedError::JListFailure { .. }
            | SchedError::IoError(_)
    )
}

fn escalate(target: &str, err: SchedError) -> SchedError {
    match err {
        SchedError::JListFailure { reason, output } | SchedError::SubmissionFailure { reason, output } => {
            SchedError::submission(format!("gave up waiting for {target}: {reason}"), output)
        }
        other => SchedError::submission(
            format!("gave up waiting for {target}: {other}"),
            CommandOutput::default(),
        ),
    }
}

/// Poll until the job settles, vanishes or the attempts budget runs out.
///
/// Transient backend errors are logged and count as attempts; if the budget
/// runs out right after one, it is escalated as a `SubmissionFailure`.
/// `pause` sleeps for the policy interval between attempts; adapters whose
/// poll already blocks for the interval pass `false`.
pub(crate) async fn poll_loop<F, Fut>(
    policy: &WaitPolicy,
    target: &str,
    pause: bool,
    mut poll: F,
) -> SchedResult<WaitOutcome>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = SchedResult<Poll>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let mut last_error = None;
        match poll(attempt).await {
            Ok(Poll::Settled(state)) => return Ok(WaitOutcome::Finished(state)),
            Ok(Poll::Vanished) => {
                warn!(
                    job = target,
                    attempt, "Job disappeared from the listing before reaching a terminal state"
                );
                return Ok(WaitOutcome::Vanished { attempts: attempt });
            }
            Ok(Poll::Waiting(state)) => {
                if policy.report {
                    match policy.max_attempts {
                        Some(max) => info!(
                            job = target,
                            state = %state,
                            remaining = max.saturating_sub(attempt),
                            "Waiting for job"
                        ),
                        None => info!(job = target, state = %state, attempt, "Waiting for job"),
                    }
                }
            }
            Err(e) if is_transient(&e) => {
                warn!(job = target, attempt, error = %e, "Backend unavailable while waiting");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return match last_error {
                Some(e) => Err(escalate(target, e)),
                None => Ok(WaitOutcome::GaveUp { attempts: attempt }),
            };
        }
        if pause && !policy.interval.is_zero() {
            tokio::time::sleep(policy.interval).await;
        }
    }
}
