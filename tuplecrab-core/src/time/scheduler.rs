use super::*;

/// A one-shot unit of work.
pub type ScheduledTask = Box<dyn FnOnce() -> Result<()> + Send>;

/// A task run repeatedly at a fixed rate.
pub type PeriodicTask = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Receives the error of a failed task. Jobs install one that marks the job
/// unhealthy.
pub type ErrorHook = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// Timer and executor shared by the oplets of one job.
///
/// Tasks run one at a time in fire-time order, so work submitted through
/// [`execute`](Self::execute) keeps its submission order.
pub trait Scheduler: Send + Sync {
    /// Current time on the scheduler's clock.
    fn now(&self) -> EventTime;

    /// Run `task` after `delay`.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> Result<TaskHandle>;

    /// Run `task` after `initial`, then every `period` until cancelled.
    fn schedule_at_fixed_rate(
        &self,
        initial: Duration,
        period: Duration,
        task: PeriodicTask,
    ) -> Result<TaskHandle>;

    /// Stop running tasks. Returns how many pending tasks were dropped.
    fn shutdown_now(&self) -> usize;

    fn is_shutdown(&self) -> bool;

    /// Run `task` as soon as possible.
    fn execute(&self, task: ScheduledTask) -> Result<TaskHandle> {
        self.schedule(Duration::ZERO, task)
    }
}

/// Cancels a scheduled task. Cancelling an already-run task is a no-op.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Callbacks a scheduler reports to.
#[derive(Clone, Default)]
pub struct SchedulerHooks {
    pub on_error: Option<ErrorHook>,
    pub activity: Option<Arc<ActivityTracker>>,
}

impl SchedulerHooks {
    pub(crate) fn begin(&self) {
        if let Some(activity) = &self.activity {
            activity.begin();
        }
    }

    pub(crate) fn end(&self) {
        if let Some(activity) = &self.activity {
            activity.end();
        }
    }

    pub(crate) fn report(&self, err: anyhow::Error) {
        tracing::warn!("scheduled task failed: {:#}", err);
        if let Some(hook) = &self.on_error {
            hook(&err);
        }
    }
}

pub(crate) enum TaskKind {
    Once(ScheduledTask),
    Repeating { task: PeriodicTask, period: EventTime },
}

/// A task sitting in a [`TimerQueue`].
pub(crate) struct TimerEntry {
    pub(crate) handle: TaskHandle,
    pub(crate) kind: TaskKind,
}

impl TimerEntry {
    pub(crate) fn once(task: ScheduledTask) -> Self {
        Self {
            handle: TaskHandle::default(),
            kind: TaskKind::Once(task),
        }
    }

    pub(crate) fn repeating(task: PeriodicTask, period: Duration) -> Result<Self> {
        let period = duration_ms(period);
        if period <= 0 {
            bail!("fixed-rate period must be at least 1ms");
        }
        Ok(Self {
            handle: TaskHandle::default(),
            kind: TaskKind::Repeating { task, period },
        })
    }

    /// Run the entry that was due at `fire_at`; returns the entry again with
    /// its next fire time if it repeats.
    pub(crate) fn fire(
        self,
        fire_at: EventTime,
        hooks: &SchedulerHooks,
    ) -> Option<(EventTime, Self)> {
        if self.handle.is_cancelled() {
            hooks.end();
            return None;
        }
        match self.kind {
            TaskKind::Once(task) => {
                if let Err(err) = run_guarded(task) {
                    hooks.report(err);
                }
                hooks.end();
                None
            }
            TaskKind::Repeating { task, period } => {
                if let Err(err) = run_guarded(|| task()) {
                    hooks.report(err);
                }
                if self.handle.is_cancelled() {
                    hooks.end();
                    return None;
                }
                Some((
                    fire_at + period,
                    Self {
                        handle: self.handle,
                        kind: TaskKind::Repeating { task, period },
                    },
                ))
            }
        }
    }
}

/// Run `f`, turning a panic into an error.
pub(crate) fn run_guarded(f: impl FnOnce() -> Result<()>) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(anyhow!("task panicked: {}", msg))
        }
    }
}
