use super::*;
use crate::execution::ThreadSpawner;
use crate::time::PeriodicTask;

type Poller<T> = Box<dyn FnMut() -> Option<T> + Send>;

struct PeriodicState {
    period: Duration,
    scheduler: Option<Arc<dyn Scheduler>>,
    task: Option<PeriodicTask>,
    handle: Option<TaskHandle>,
}

/// Runtime control of a [`PeriodicSource`]'s polling period.
#[derive(Clone)]
pub struct PeriodicControl {
    state: Arc<Mutex<PeriodicState>>,
}

impl PeriodicControl {
    pub fn period(&self) -> Duration {
        self.state.lock().expect("periodic state poisoned").period
    }

    /// Change the period. A running source is rescheduled with its first
    /// poll one new period from now.
    pub fn set_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(anyhow!("poll period must be positive"));
        }
        let mut state = self.state.lock().expect("periodic state poisoned");
        if state.period == period {
            return Ok(());
        }
        state.period = period;
        if let (Some(scheduler), Some(task)) = (state.scheduler.clone(), state.task.clone()) {
            if let Some(old) = state.handle.take() {
                old.cancel();
            }
            state.handle = Some(scheduler.schedule_at_fixed_rate(period, period, task)?);
            tracing::info!("periodic source rescheduled every {:?}", period);
        }
        Ok(())
    }

    fn start(&self, task: PeriodicTask) -> Result<()> {
        let mut state = self.state.lock().expect("periodic state poisoned");
        let scheduler = state
            .scheduler
            .clone()
            .ok_or_else(|| anyhow!("periodic source was not initialized"))?;
        state.handle = Some(scheduler.schedule_at_fixed_rate(
            Duration::ZERO,
            state.period,
            Arc::clone(&task),
        )?);
        state.task = Some(task);
        Ok(())
    }

    fn stop(&self) {
        let mut state = self.state.lock().expect("periodic state poisoned");
        if let Some(handle) = state.handle.take() {
            handle.cancel();
        }
        state.task = None;
        state.scheduler = None;
    }
}

/// Polls a function on the job scheduler at a fixed rate and submits every
/// `Some` it returns.
pub struct PeriodicSource<T> {
    poller: Arc<Mutex<Option<Poller<T>>>>,
    control: PeriodicControl,
    output: Option<Output<T>>,
}

impl<T: Tuple> PeriodicSource<T> {
    pub fn new(period: Duration, poller: impl FnMut() -> Option<T> + Send + 'static) -> Self {
        Self {
            poller: Arc::new(Mutex::new(Some(Box::new(poller)))),
            control: PeriodicControl {
                state: Arc::new(Mutex::new(PeriodicState {
                    period,
                    scheduler: None,
                    task: None,
                    handle: None,
                })),
            },
            output: None,
        }
    }

    pub fn control(&self) -> PeriodicControl {
        self.control.clone()
    }
}

impl<T: Tuple> Oplet for PeriodicSource<T> {
    type In = Infallible;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Source
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        if self.control.period().is_zero() {
            return Err(anyhow!("poll period must be positive"));
        }
        let scheduler = ctx
            .scheduler()
            .context("periodic source requires a scheduler service")?;
        self.control
            .state
            .lock()
            .expect("periodic state poisoned")
            .scheduler = Some(scheduler);
        self.output = Some(single_output(ctx)?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let output = self
            .output
            .clone()
            .ok_or_else(|| anyhow!("periodic source was not initialized"))?;
        let poller = Arc::clone(&self.poller);
        self.control.start(Arc::new(move || {
            let mut poller = poller.lock().expect("poller poisoned");
            if let Some(tuple) = poller.as_mut().and_then(|poll| poll()) {
                output.submit(tuple);
            }
            Ok(())
        }))
    }

    fn accept(&mut self, _port: usize, tuple: Infallible) -> Result<()> {
        match tuple {}
    }

    fn close(&mut self) -> Result<()> {
        self.control.stop();
        self.poller.lock().expect("poller poisoned").take();
        Ok(())
    }
}

type Process<T> = Box<dyn FnOnce(&Output<T>, &Cancellation) -> Result<()> + Send>;

/// Runs a producer on its own thread. The producer should return once it
/// is exhausted or once the job cancels it.
pub struct ProcessSource<T> {
    process: Option<Process<T>>,
    output: Option<Output<T>>,
    spawner: Option<Arc<ThreadSpawner>>,
    thread_name: String,
}

impl<T: Tuple> ProcessSource<T> {
    pub fn new(
        process: impl FnOnce(&Output<T>, &Cancellation) -> Result<()> + Send + 'static,
    ) -> Self {
        Self {
            process: Some(Box::new(process)),
            output: None,
            spawner: None,
            thread_name: String::new(),
        }
    }

    /// Submit every item of the iterable returned by `supplier`, stopping
    /// early when cancelled.
    pub fn from_iter<I>(supplier: impl FnOnce() -> I + Send + 'static) -> Self
    where
        I: IntoIterator<Item = T>,
    {
        Self::new(move |out, cancel| {
            for tuple in supplier() {
                if cancel.is_cancelled() {
                    break;
                }
                out.submit(tuple);
            }
            Ok(())
        })
    }
}

impl<T: Tuple> Oplet for ProcessSource<T> {
    type In = Infallible;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Source
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        self.spawner = Some(
            ctx.thread_spawner()
                .context("process source requires a thread spawner service")?,
        );
        self.output = Some(single_output(ctx)?);
        self.thread_name = ctx.uniquify("source");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (Some(spawner), Some(output), Some(process)) =
            (self.spawner.as_ref(), self.output.clone(), self.process.take())
        else {
            return Err(anyhow!("process source was not initialized"));
        };
        spawner.spawn(&self.thread_name, move |cancel| process(&output, cancel))
    }

    fn accept(&mut self, _port: usize, tuple: Infallible) -> Result<()> {
        match tuple {}
    }

    fn close(&mut self) -> Result<()> {
        self.process = None;
        Ok(())
    }
}

type Setup<T> = Box<dyn FnOnce(Output<T>) -> Result<()> + Send>;

/// Bridges an external, callback-driven event source into the graph.
///
/// At start `setup` runs on the job scheduler and receives the output
/// handle; it typically registers a listener that submits each event.
pub struct Events<T> {
    setup: Option<Setup<T>>,
    output: Option<Output<T>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<T: Tuple> Events<T> {
    pub fn new(setup: impl FnOnce(Output<T>) -> Result<()> + Send + 'static) -> Self {
        Self {
            setup: Some(Box::new(setup)),
            output: None,
            scheduler: None,
        }
    }
}

impl<T: Tuple> Oplet for Events<T> {
    type In = Infallible;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Source
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        self.scheduler = Some(
            ctx.scheduler()
                .context("events source requires a scheduler service")?,
        );
        self.output = Some(single_output(ctx)?);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (Some(scheduler), Some(output), Some(setup)) =
            (self.scheduler.as_ref(), self.output.clone(), self.setup.take())
        else {
            return Err(anyhow!("events source was not initialized"));
        };
        scheduler.execute(Box::new(move || setup(output)))?;
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: Infallible) -> Result<()> {
        match tuple {}
    }

    fn close(&mut self) -> Result<()> {
        self.setup = None;
        self.scheduler = None;
        Ok(())
    }
}
