use super::*;

/// A scheduler whose clock only moves when the caller advances it.
///
/// Due tasks run on the caller's thread inside [`advance`](Self::advance)
/// and [`run_pending`](Self::run_pending), which makes time-driven
/// behaviour reproducible in tests.
pub struct ManualScheduler {
    clock: ManualClock,
    timers: Mutex<TimerQueue<TimerEntry>>,
    hooks: SchedulerHooks,
    shutdown: AtomicBool,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::with_hooks(SchedulerHooks::default())
    }

    pub fn with_hooks(hooks: SchedulerHooks) -> Self {
        Self {
            clock: ManualClock::new(0),
            timers: Mutex::new(TimerQueue::new()),
            hooks,
            shutdown: AtomicBool::new(false),
        }
    }

    /// Move the clock forward by `by`, running every task that falls due on
    /// the way. Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.clock.now() + duration_ms(by);
        let mut ran = 0;
        loop {
            if self.is_shutdown() {
                break;
            }
            let due = self.timers.lock().expect("timers poisoned").pop_due(target);
            let Some((fire_at, entry)) = due else { break };
            self.clock.set(fire_at);
            ran += 1;
            if let Some((next, entry)) = entry.fire(fire_at, &self.hooks) {
                self.timers
                    .lock()
                    .expect("timers poisoned")
                    .register(next, entry);
            }
        }
        self.clock.set(target);
        ran
    }

    /// Run the tasks already due without moving the clock.
    pub fn run_pending(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Number of tasks waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers.lock().expect("timers poisoned").len()
    }

    fn submit(&self, delay: Duration, entry: TimerEntry) -> Result<TaskHandle> {
        if self.is_shutdown() {
            bail!("manual scheduler is shut down");
        }
        let handle = entry.handle.clone();
        self.hooks.begin();
        self.timers
            .lock()
            .expect("timers poisoned")
            .register(self.clock.now() + duration_ms(delay), entry);
        Ok(handle)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
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
        let dropped = self.timers.lock().expect("timers poisoned").drain_all();
        let unfinished = dropped.iter().filter(|e| !e.handle.is_cancelled()).count();
        for _ in &dropped {
            self.hooks.end();
        }
        unfinished
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
