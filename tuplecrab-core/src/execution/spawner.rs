use super::*;

/// Cooperative stop signal for threads started by a [`ThreadSpawner`].
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Starts the long-running threads of one job and stops them when the job
/// closes. Live threads count as outstanding work.
pub struct ThreadSpawner {
    prefix: String,
    cancel: Cancellation,
    hooks: SchedulerHooks,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadSpawner {
    pub fn new(prefix: impl Into<String>, hooks: SchedulerHooks) -> Self {
        Self {
            prefix: prefix.into(),
            cancel: Cancellation::default(),
            hooks,
            threads: Mutex::new(Vec::new()),
        }
    }

    /// Run `body` on a new thread. Its error, if any, is reported to the job.
    pub fn spawn(
        &self,
        name: &str,
        body: impl FnOnce(&Cancellation) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("thread spawner {} is shut down", self.prefix);
        }
        let cancel = self.cancel.clone();
        let hooks = self.hooks.clone();
        self.hooks.begin();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.prefix, name))
            .spawn(move || {
                if let Err(err) = run_guarded(|| body(&cancel)) {
                    hooks.report(err);
                }
                hooks.end();
            });
        match spawned {
            Ok(handle) => {
                let mut threads = self.threads.lock().expect("threads poisoned");
                threads.retain(|t| !t.is_finished());
                threads.push(handle);
                Ok(())
            }
            Err(err) => {
                self.hooks.end();
                Err(anyhow!("failed to spawn thread {}: {}", name, err))
            }
        }
    }

    /// Ask every thread to stop. Threads are not joined.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
        self.threads.lock().expect("threads poisoned").clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of spawned threads still running.
    pub fn live_threads(&self) -> usize {
        self.threads
            .lock()
            .expect("threads poisoned")
            .iter()
            .filter(|t| !t.is_finished())
            .count()
    }
}

impl Drop for ThreadSpawner {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
