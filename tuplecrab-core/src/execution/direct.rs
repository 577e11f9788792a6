use super::*;

/// Floor applied to [`Job::complete`] timeouts.
const MIN_COMPLETE_WAIT: Duration = Duration::from_secs(1);
const COMPLETE_POLL: Duration = Duration::from_millis(50);

/// A job running in this process.
///
/// Each accepted action runs on its own control thread; the transition is
/// completed once the action has run over every vertex. Dropping the last
/// handle closes the job's oplets.
pub struct DirectJob {
    id: JobId,
    name: String,
    state: Arc<JobState>,
    executable: Arc<Executable>,
    registry: Option<Arc<JobRegistry>>,
    counts: Vec<PortCount>,
}

impl DirectJob {
    pub fn status(&self) -> JobStatus {
        self.state.snapshot()
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    /// Block until the job reaches `state`.
    pub fn wait_for_state(&self, state: State, timeout: Duration) -> bool {
        self.state.wait_for(state, timeout)
    }

    /// Counters spliced in when the job was submitted with
    /// `instrument_counters`.
    pub fn tuple_counts(&self) -> &[PortCount] {
        &self.counts
    }

    fn update_registry(&self) {
        if let Some(registry) = &self.registry {
            registry.update(&self.id, self.state.snapshot());
        }
    }
}

fn run_action(
    id: &str,
    action: Action,
    executable: &Executable,
    state: &JobState,
    registry: Option<&JobRegistry>,
) {
    let result = match action {
        Action::Initialize => executable.initialize(),
        Action::Start => executable.start(),
        Action::Close => {
            executable.close();
            Ok(())
        }
        Action::Pause | Action::Resume => Ok(()),
    };
    if let Err(err) = result {
        tracing::warn!("job {} {}: {:#}", id, action, err);
    }
    let current = state.complete_transition();
    tracing::info!("job {} is {}", id, current);
    if let Some(registry) = registry {
        registry.update(id, state.snapshot());
    }
}

impl Job for DirectJob {
    fn id(&self) -> &JobId {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> State {
        self.state.current()
    }

    fn next_state(&self) -> State {
        self.state.next()
    }

    fn state_change(&self, action: Action) -> Result<(), JobError> {
        if matches!(action, Action::Pause | Action::Resume) {
            return Err(JobError::Unsupported(action));
        }
        let previous = self.state.request(action)?;
        self.update_registry();
        if previous == action.target() {
            // CLOSE on a closed job.
            self.state.complete_transition();
            self.update_registry();
            return Ok(());
        }

        let id = self.id.clone();
        let executable = Arc::clone(&self.executable);
        let state = Arc::clone(&self.state);
        let registry = self.registry.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", self.id, action.to_string().to_lowercase()))
            .spawn(move || run_action(&id, action, &executable, &state, registry.as_deref()));
        if let Err(err) = spawned {
            tracing::warn!(
                "job {}: no control thread ({}), running {} inline",
                self.id,
                err,
                action
            );
            run_action(
                &self.id,
                action,
                &self.executable,
                &self.state,
                self.registry.as_deref(),
            );
        }
        Ok(())
    }

    fn health(&self) -> Health {
        self.state.snapshot().health
    }

    fn last_error(&self) -> Option<String> {
        self.state.snapshot().last_error
    }

    fn complete(&self, timeout: Duration) -> Result<(), JobError> {
        let timeout = if timeout.is_zero() {
            MIN_COMPLETE_WAIT
        } else {
            timeout
        };
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.state.snapshot();
            if status.current == State::Closed || status.next == State::Closed {
                return Ok(());
            }
            if let Some(err) = status.last_error {
                return Err(JobError::Failed(err));
            }
            if !self.executable.has_active_work() {
                tracing::info!("job {}: no more active user tasks", self.id);
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(JobError::Timeout(timeout));
            }
            self.executable
                .activity()
                .wait_idle(COMPLETE_POLL.min(deadline - now));
        }
    }
}

impl Drop for DirectJob {
    fn drop(&mut self) {
        self.executable.close();
    }
}

/// Pending result of [`DirectProvider::submit`].
pub struct Submission {
    job_id: JobId,
    result: Receiver<Result<Arc<DirectJob>, JobError>>,
}

impl Submission {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the job to be initialized and started.
    pub fn wait(self, timeout: Duration) -> Result<Arc<DirectJob>> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "job {} did not start within {:?}",
                self.job_id,
                timeout
            )),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow!("job {} submission thread exited", self.job_id))
            }
        }
    }
}

/// Runs submitted graphs as [`DirectJob`]s in this process.
///
/// Provider-level services are visible to every job; a
/// [`JobRegistry`] is registered under [`JOB_REGISTRY`].
pub struct DirectProvider {
    services: Arc<ServiceRegistry>,
    registry: Arc<JobRegistry>,
}

impl DirectProvider {
    pub fn new() -> Self {
        let services = Arc::new(ServiceRegistry::new());
        let registry = Arc::new(JobRegistry::new());
        services.replace(&JOB_REGISTRY, Arc::clone(&registry));
        Self { services, registry }
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn job_registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Build a job from `graph`, then initialize and start it on a
    /// background thread.
    pub fn submit(
        &self,
        graph: Graph,
        topology: &str,
        config: &JobConfig,
    ) -> Result<Submission> {
        let mut graph = graph;
        let id = next_job_id();
        let name = config
            .job_name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", topology, id));
        let counts = if config.instrument_counters {
            instrument_counters(&mut graph)?
        } else {
            Vec::new()
        };

        let state = Arc::new(JobState::new());
        let executable = Arc::new(Executable::new(
            id.clone(),
            name.clone(),
            graph,
            Arc::clone(&self.services),
            Arc::clone(&state),
        )?);
        let registry = self.services.get(&JOB_REGISTRY);
        if let Some(registry) = &registry {
            registry.add(&id, &name, state.snapshot());
        }
        let job = Arc::new(DirectJob {
            id: id.clone(),
            name,
            state,
            executable,
            registry,
            counts,
        });
        tracing::info!("submitting job {} ({})", job.id, job.name);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let warn_after = config.action_timeout();
        thread::Builder::new()
            .name(format!("{}-submit", id))
            .spawn(move || {
                let result = bring_up(&job, warn_after).map(|_| job);
                let _ = tx.send(result);
            })?;
        Ok(Submission {
            job_id: id,
            result: rx,
        })
    }
}

impl Default for DirectProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn bring_up(job: &DirectJob, warn_after: Duration) -> Result<(), JobError> {
    for (action, target) in [
        (Action::Initialize, State::Initialized),
        (Action::Start, State::Running),
    ] {
        job.state_change(action)?;
        // Every accepted action completes its transition; the caller of
        // `Submission::wait` bounds how long it is prepared to wait.
        let status = loop {
            let (status, reached) = job.state.wait_until(warn_after, |status| {
                status.current == target || status.current == State::Closed
            });
            if reached {
                break status;
            }
            tracing::warn!("job {}: {} still running after {:?}", job.id, action, warn_after);
        };
        if status.current == State::Closed {
            return Err(JobError::Failed(format!("job {} closed while starting", job.id)));
        }
    }
    Ok(())
}
