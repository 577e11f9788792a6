use super::*;

enum Command {
    Schedule(EventTime, TimerEntry),
    Shutdown,
}

/// A scheduler backed by one dedicated thread.
pub struct ThreadScheduler {
    name: String,
    clock: Arc<SystemClock>,
    commands: Sender<Command>,
    hooks: SchedulerHooks,
    shutdown: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<usize>>>,
    worker_id: ThreadId,
}

impl ThreadScheduler {
    /// Spawn the scheduler thread.
    pub fn start(name: impl Into<String>, hooks: SchedulerHooks) -> Result<Self> {
        let name = name.into();
        let clock = Arc::new(SystemClock::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let (commands, rx) = crossbeam_channel::unbounded();

        let worker = thread::Builder::new().name(name.clone()).spawn({
            let clock = Arc::clone(&clock);
            let hooks = hooks.clone();
            let shutdown = Arc::clone(&shutdown);
            move || run_worker(rx, clock, hooks, shutdown)
        })?;
        let worker_id = worker.thread().id();

        Ok(Self {
            name,
            clock,
            commands,
            hooks,
            shutdown,
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn submit(&self, delay: Duration, entry: TimerEntry) -> Result<TaskHandle> {
        if self.is_shutdown() {
            bail!("scheduler {} is shut down", self.name);
        }
        let handle = entry.handle.clone();
        let fire_at = self.clock.now() + duration_ms(delay);
        self.hooks.begin();
        if self.commands.send(Command::Schedule(fire_at, entry)).is_err() {
            self.hooks.end();
            bail!("scheduler {} is shut down", self.name);
        }
        Ok(handle)
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> EventTime {
        self.clock.now()
    }

    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle> {
        self.submit(delay, TimerEntry::once(task))
    }

    fn schedule_at_fixed_rate(
        &self,
        initial: Duration,
        period: Duration,
        task: PeriodicTask,
    ) -> Result<TaskHandle> {
        self.submit(initial, TimerEntry::repeating(task, period)?)
    }

    fn shutdown_now(&self) -> usize {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return 0;
        }
        let _ = self.commands.send(Command::Shutdown);
        // A task shutting down its own scheduler cannot wait for itself.
        if thread::current().id() == self.worker_id {
            return 0;
        }
        let worker = self.worker.lock().expect("scheduler worker poisoned").take();
        let unfinished = match worker.map(JoinHandle::join) {
            Some(Ok(unfinished)) => unfinished,
            Some(Err(_)) => {
                tracing::warn!("scheduler {} thread panicked", self.name);
                0
            }
            None => 0,
        };
        if unfinished > 0 {
            tracing::warn!(
                "scheduler {} could not finish {} tasks",
                self.name,
                unfinished
            );
        }
        unfinished
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

fn run_worker(
    rx: Receiver<Command>,
    clock: Arc<SystemClock>,
    hooks: SchedulerHooks,
    shutdown: Arc<AtomicBool>,
) -> usize {
    let mut timers: TimerQueue<TimerEntry> = TimerQueue::new();
    'run: loop {
        while let Some((fire_at, entry)) = timers.pop_due(clock.now()) {
            if shutdown.load(Ordering::SeqCst) {
                timers.register(fire_at, entry);
                break 'run;
            }
            if let Some((next, entry)) = entry.fire(fire_at, &hooks) {
                timers.register(next, entry);
            }
        }

        let command = match timers.next_timer() {
            Some(fire_at) => {
                let wait = (fire_at - clock.now()).max(0) as u64;
                rx.recv_timeout(Duration::from_millis(wait))
            }
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match command {
            Ok(Command::Schedule(fire_at, entry)) => timers.register(fire_at, entry),
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    let mut unfinished = 0;
    let queued = rx.try_iter().filter_map(|command| match command {
        Command::Schedule(_, entry) => Some(entry),
        Command::Shutdown => None,
    });
    for entry in timers.drain_all().into_iter().chain(queued) {
        if !entry.handle.is_cancelled() {
            unfinished += 1;
        }
        hooks.end();
    }
    tracing::debug!("scheduler thread exiting, {} tasks dropped", unfinished);
    unfinished
}
