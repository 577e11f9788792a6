use super::*;

/// Registry view of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobEntry {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobEvent {
    Added,
    Updated,
    Removed,
}

pub type JobListener = Arc<dyn Fn(JobEvent, &JobEntry) + Send + Sync>;

/// Provider-wide record of submitted jobs and their latest status.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<Vec<JobEntry>>,
    listeners: RwLock<Vec<JobListener>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners are called on the thread that changed the registry.
    pub fn add_listener(&self, listener: JobListener) {
        self.listeners
            .write()
            .expect("listeners poisoned")
            .push(listener);
    }

    pub fn add(&self, id: &str, name: &str, status: JobStatus) {
        let entry = JobEntry {
            id: id.to_string(),
            name: name.to_string(),
            status,
        };
        self.jobs
            .write()
            .expect("jobs poisoned")
            .push(entry.clone());
        self.notify(JobEvent::Added, &entry);
    }

    /// Record a new status. Unknown ids are ignored.
    pub fn update(&self, id: &str, status: JobStatus) {
        let updated = {
            let mut jobs = self.jobs.write().expect("jobs poisoned");
            jobs.iter_mut().find(|e| e.id == id).map(|entry| {
                entry.status = status;
                entry.clone()
            })
        };
        if let Some(entry) = updated {
            self.notify(JobEvent::Updated, &entry);
        }
    }

    pub fn remove(&self, id: &str) -> Option<JobEntry> {
        let removed = {
            let mut jobs = self.jobs.write().expect("jobs poisoned");
            let index = jobs.iter().position(|e| e.id == id)?;
            jobs.remove(index)
        };
        self.notify(JobEvent::Removed, &removed);
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<JobEntry> {
        self.jobs
            .read()
            .expect("jobs poisoned")
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All jobs in submission order.
    pub fn jobs(&self) -> Vec<JobEntry> {
        self.jobs.read().expect("jobs poisoned").clone()
    }

    fn notify(&self, event: JobEvent, entry: &JobEntry) {
        let listeners = self.listeners.read().expect("listeners poisoned").clone();
        for listener in listeners {
            listener(event, entry);
        }
    }
}
