//! Job lifecycle: states, actions, health and the state machine that
//! guards transitions between them.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::JobId;

mod state;

pub use state::*;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Constructed,
    Initialized,
    Running,
    Paused,
    Closed,
}

impl State {
    /// States reachable from `self` in one transition.
    pub fn successors(self) -> &'static [State] {
        match self {
            State::Constructed => &[State::Initialized, State::Closed],
            State::Initialized => &[State::Running, State::Closed],
            State::Running => &[State::Paused, State::Closed],
            State::Paused => &[State::Running, State::Closed],
            State::Closed => &[State::Closed],
        }
    }

    pub fn can_move_to(self, target: State) -> bool {
        self.successors().contains(&target)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            State::Constructed => "CONSTRUCTED",
            State::Initialized => "INITIALIZED",
            State::Running => "RUNNING",
            State::Paused => "PAUSED",
            State::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// A request to move a job to another state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Initialize,
    Start,
    Pause,
    Resume,
    Close,
}

impl Action {
    /// The state the action leads to.
    pub fn target(self) -> State {
        match self {
            Action::Initialize => State::Initialized,
            Action::Start | Action::Resume => State::Running,
            Action::Pause => State::Paused,
            Action::Close => State::Closed,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Initialize => "INITIALIZE",
            Action::Start => "START",
            Action::Pause => "PAUSE",
            Action::Resume => "RESUME",
            Action::Close => "CLOSE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Unhealthy,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("cannot {action}: job is moving from {current} to {next}")]
    InTransition {
        action: Action,
        current: State,
        next: State,
    },
    #[error("cannot {action}: {target} is not reachable from {current}")]
    Unreachable {
        action: Action,
        current: State,
        target: State,
    },
    #[error("{0} is not supported")]
    Unsupported(Action),
    #[error("job did not complete within {0:?}")]
    Timeout(Duration),
    #[error("job failed: {0}")]
    Failed(String),
}

/// Control surface of a submitted job.
pub trait Job: Send + Sync {
    fn id(&self) -> &JobId;

    fn name(&self) -> &str;

    fn current_state(&self) -> State;

    /// Equal to [`current_state`](Self::current_state) unless a transition
    /// is in flight.
    fn next_state(&self) -> State;

    /// Request a transition. Returns once the request is accepted; the
    /// transition itself completes asynchronously.
    fn state_change(&self, action: Action) -> Result<(), JobError>;

    fn health(&self) -> Health;

    fn last_error(&self) -> Option<String>;

    /// Wait until the job is closed or has no outstanding work. Fails with
    /// [`JobError::Failed`] if the job recorded an error, and with
    /// [`JobError::Timeout`] if `timeout` passes first.
    fn complete(&self, timeout: Duration) -> Result<(), JobError>;
}

#[cfg(test)]
#[path = "tests/job_tests.rs"]
mod tests;
