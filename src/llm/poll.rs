//! Bounded polling of an asynchronous run.

use std::time::Duration;

use tracing::{debug, warn};

use super::{AssistantClient, RunStatus};
use crate::clock::Clock;
use crate::error::LlmError;

/// How often and for how long to poll.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub budget: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        Self { interval, budget }
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(String),
    Failed(String),
    /// Budget exhausted while the run was still queued or in progress.
    TimedOut,
}

/// Poll `run_id` until it finishes or the budget runs out.
///
/// Each poll request is capped at the remaining budget and a sleep is only
/// taken when the next poll still starts inside it, so the call returns
/// within `policy.budget` even when the service stops answering.
pub async fn wait_for_run(
    client: &dyn AssistantClient,
    clock: &dyn Clock,
    thread_id: &str,
    run_id: &str,
    policy: PollPolicy,
) -> Result<PollOutcome, LlmError> {
    let started = clock.now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let remaining = policy
            .budget
            .saturating_sub(clock.now().saturating_sub(started));
        let status = match tokio::time::timeout(remaining, client.poll_run(thread_id, run_id)).await
        {
            Ok(status) => status?,
            Err(_) => {
                warn!(thread_id, run_id, attempt, "Poll request outlived the budget");
                return Ok(PollOutcome::TimedOut);
            }
        };
        let elapsed = clock.now().saturating_sub(started);
        debug!(
            thread_id,
            run_id,
            attempt,
            elapsed_ms = elapsed.as_millis() as u64,
            status = ?status,
            "Polled run"
        );

        match status {
            RunStatus::Completed(text) => return Ok(PollOutcome::Completed(text)),
            RunStatus::Failed(reason) => return Ok(PollOutcome::Failed(reason)),
            RunStatus::Queued | RunStatus::InProgress => {}
        }

        if elapsed + policy.interval >= policy.budget {
            debug!(thread_id, run_id, attempt, "Poll budget exhausted");
            return Ok(PollOutcome::TimedOut);
        }
        clock.sleep(policy.interval).await;
    }
}
