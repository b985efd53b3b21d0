//! Poll-until-terminal state machine shared by the asynchronous adapters.
//!
//! `Submitted -> Running* -> Succeeded | Failed | Cancelled`. There is no
//! built-in deadline: the loop ends on a terminal state, on an error from the
//! status call, or when the caller's [`CancellationToken`] fires. Giving up
//! never cancels the remote job.

use crate::error::TablesError;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled
        )
    }

    /// Map an interactive-query state name (`QUEUED`, `RUNNING`, ...).
    pub fn from_query_state(state: &str) -> Self {
        match state {
            "QUEUED" => RunState::Submitted,
            "SUCCEEDED" => RunState::Succeeded,
            "FAILED" => RunState::Failed,
            "CANCELLED" => RunState::Cancelled,
            _ => RunState::Running,
        }
    }

    /// Map a batch job-run state name (`SUBMITTED`, `SCHEDULED`, `SUCCESS`, ...).
    pub fn from_job_state(state: &str) -> Self {
        match state {
            "SUBMITTED" | "PENDING" | "SCHEDULED" => RunState::Submitted,
            "SUCCESS" => RunState::Succeeded,
            "FAILED" => RunState::Failed,
            "CANCELLED" => RunState::Cancelled,
            _ => RunState::Running,
        }
    }
}

/// A status snapshot the poll loop can inspect.
pub trait Observed {
    fn run_state(&self) -> RunState;
}

impl Observed for crate::clients::QueryExecutionInfo {
    fn run_state(&self) -> RunState {
        self.state
    }
}

impl Observed for crate::clients::JobRunInfo {
    fn run_state(&self) -> RunState {
        self.state
    }
}

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub cancel: CancellationToken,
}

impl PollOptions {
    pub fn new(interval: Duration, cancel: CancellationToken) -> Self {
        Self { interval, cancel }
    }
}

/// Call `fetch` until it reports a terminal state, sleeping `interval` between calls.
pub async fn poll_until_terminal<T, F, Fut>(
    options: &PollOptions,
    mut fetch: F,
) -> Result<T, TablesError>
where
    T: Observed,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TablesError>>,
{
    let mut attempts: u64 = 0;
    loop {
        if options.cancel.is_cancelled() {
            return Err(cancelled_error());
        }

        let snapshot = fetch().await?;
        attempts += 1;
        let state = snapshot.run_state();
        if state.is_terminal() {
            debug!(?state, attempts, "poll reached terminal state");
            return Ok(snapshot);
        }
        debug!(?state, attempts, "still waiting");

        tokio::select! {
            _ = options.cancel.cancelled() => return Err(cancelled_error()),
            _ = tokio::time::sleep(options.interval) => {}
        }
    }
}

fn cancelled_error() -> TablesError {
    TablesError::execution("polling cancelled by caller; the submitted job may still be running")
}
