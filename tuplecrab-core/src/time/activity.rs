use super::*;

/// Counts outstanding units of work (pending tasks, live source threads)
/// so callers can wait for a job to go quiet.
#[derive(Debug, Default)]
pub struct ActivityTracker {
    active: Mutex<usize>,
    idle: Condvar,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) {
        *self.active.lock().expect("activity lock poisoned") += 1;
    }

    pub fn end(&self) {
        let mut active = self.active.lock().expect("activity lock poisoned");
        *active = active.saturating_sub(1);
        if *active == 0 {
            self.idle.notify_all();
        }
    }

    pub fn active(&self) -> usize {
        *self.active.lock().expect("activity lock poisoned")
    }

    /// Block until no work is outstanding. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let active = self.active.lock().expect("activity lock poisoned");
        let (active, _) = self
            .idle
            .wait_timeout_while(active, timeout, |n| *n > 0)
            .expect("activity lock poisoned");
        *active == 0
    }
}
