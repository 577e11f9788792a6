use super::*;

/// Point-in-time copy of a job's status fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub current: State,
    pub next: State,
    pub health: Health,
    pub last_error: Option<String>,
}

impl JobStatus {
    pub fn in_transition(&self) -> bool {
        self.current != self.next
    }
}

/// The guarded status of one job.
///
/// All fields sit behind one mutex; waiters are woken on every change.
#[derive(Debug)]
pub struct JobState {
    status: Mutex<JobStatus>,
    changed: Condvar,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(JobStatus {
                current: State::Constructed,
                next: State::Constructed,
                health: Health::Healthy,
                last_error: None,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn snapshot(&self) -> JobStatus {
        self.status.lock().expect("job status poisoned").clone()
    }

    pub fn current(&self) -> State {
        self.status.lock().expect("job status poisoned").current
    }

    pub fn next(&self) -> State {
        self.status.lock().expect("job status poisoned").next
    }

    pub fn in_transition(&self) -> bool {
        self.status
            .lock()
            .expect("job status poisoned")
            .in_transition()
    }

    /// Accept `action` if its target is reachable and no transition is in
    /// flight. Returns the state the job was in; when that already equals
    /// the target (closing a closed job) nothing is in flight afterwards.
    pub fn request(&self, action: Action) -> Result<State, JobError> {
        let mut status = self.status.lock().expect("job status poisoned");
        let target = action.target();
        if status.in_transition() {
            return Err(JobError::InTransition {
                action,
                current: status.current,
                next: status.next,
            });
        }
        if !status.current.can_move_to(target) {
            return Err(JobError::Unreachable {
                action,
                current: status.current,
                target,
            });
        }
        status.next = target;
        self.changed.notify_all();
        Ok(status.current)
    }

    /// Make the pending next state current.
    pub fn complete_transition(&self) -> State {
        let mut status = self.status.lock().expect("job status poisoned");
        status.current = status.next;
        self.changed.notify_all();
        status.current
    }

    /// Mark the job unhealthy and remember `err` as its last error.
    pub fn report_failure(&self, err: &anyhow::Error) {
        let mut status = self.status.lock().expect("job status poisoned");
        status.health = Health::Unhealthy;
        status.last_error = Some(format!("{err:#}"));
        self.changed.notify_all();
    }

    /// Block until `predicate` holds for the status or `timeout` passes.
    /// Returns the final status and whether the predicate held.
    pub fn wait_until(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&JobStatus) -> bool,
    ) -> (JobStatus, bool) {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock().expect("job status poisoned");
        loop {
            if predicate(&status) {
                return (status.clone(), true);
            }
            let now = Instant::now();
            if now >= deadline {
                return (status.clone(), false);
            }
            status = self
                .changed
                .wait_timeout(status, deadline - now)
                .expect("job status poisoned")
                .0;
        }
    }

    /// Block until the job's current state is `state`.
    pub fn wait_for(&self, state: State, timeout: Duration) -> bool {
        self.wait_until(timeout, |status| status.current == state).1
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}
