use super::*;

/// The runtime form of a submitted graph.
///
/// Owns the job's scheduler and thread spawner, registers them as job
/// services and drives every vertex through initialize, start and close.
pub struct Executable {
    job_id: JobId,
    job_name: String,
    /// Vertices in topological order.
    vertices: Vec<Vertex>,
    services: Arc<ServiceRegistry>,
    scheduler: Arc<ThreadScheduler>,
    spawner: Arc<ThreadSpawner>,
    activity: Arc<ActivityTracker>,
    state: Arc<JobState>,
    /// Set when close starts. Faults raised after that come from work
    /// racing the shutdown and do not affect health.
    closed: Arc<AtomicBool>,
}

impl Executable {
    pub(crate) fn new(
        job_id: JobId,
        job_name: String,
        graph: Graph,
        container: Arc<ServiceRegistry>,
        state: Arc<JobState>,
    ) -> Result<Self> {
        let activity = Arc::new(ActivityTracker::new());
        let closed = Arc::new(AtomicBool::new(false));
        let on_error: ErrorHook = {
            let state = Arc::clone(&state);
            let closed = Arc::clone(&closed);
            let job_id = job_id.clone();
            Arc::new(move |err: &anyhow::Error| {
                if closed.load(Ordering::SeqCst) {
                    tracing::debug!("job {} closing, ignoring: {:#}", job_id, err);
                    return;
                }
                state.report_failure(err)
            })
        };
        let hooks = SchedulerHooks {
            on_error: Some(Arc::clone(&on_error)),
            activity: Some(Arc::clone(&activity)),
        };

        let scheduler = Arc::new(ThreadScheduler::start(
            format!("{}-scheduler", job_id),
            hooks.clone(),
        )?);
        let spawner = Arc::new(ThreadSpawner::new(job_id.clone(), hooks));

        let services = Arc::new(ServiceRegistry::with_parent(container));
        services.add(&SCHEDULER, Arc::clone(&scheduler) as Arc<dyn Scheduler>)?;
        services.add(&THREAD_SPAWNER, Arc::clone(&spawner))?;

        let mut vertices = Vec::with_capacity(graph.len());
        for id in graph.topo_order() {
            let vertex = graph.vertex(id)?.clone();
            vertex.cell().set_fault_hook(Arc::clone(&on_error));
            vertices.push(vertex);
        }

        Ok(Self {
            job_id,
            job_name,
            vertices,
            services,
            scheduler,
            spawner,
            activity,
            state,
            closed,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Job-level services; lookups fall through to the provider's.
    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn activity(&self) -> &Arc<ActivityTracker> {
        &self.activity
    }

    /// Pending scheduled tasks or live source threads.
    pub fn has_active_work(&self) -> bool {
        self.activity.active() > 0
    }

    /// Initialize every vertex in topological order. A failing vertex is
    /// reported and the rest are still initialized.
    pub fn initialize(&self) -> Result<()> {
        self.each_vertex("initialize", self.vertices.iter(), |vertex| {
            let cell = vertex.cell();
            cell.initialize(ContextParts {
                vertex: vertex.id(),
                job_id: self.job_id.clone(),
                job_name: self.job_name.clone(),
                services: Arc::clone(&self.services),
                inputs: cell.input_count(),
                outputs: cell.outputs.clone(),
            })
        })
    }

    /// Start every vertex, consumers before the vertices feeding them.
    pub fn start(&self) -> Result<()> {
        self.each_vertex("start", self.vertices.iter().rev(), |vertex| {
            vertex.cell().start()
        })
    }

    /// Stop the scheduler and source threads, then close every vertex in
    /// topological order. Runs once; later calls return immediately.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.shutdown_now();
        self.spawner.cancel_all();
        for vertex in &self.vertices {
            if let Err(err) = vertex.cell().close() {
                let err = err.context(format!("{} failed to close", vertex.id()));
                tracing::error!("job {}: {:#}", self.job_id, err);
                self.state.report_failure(&err);
            }
            self.services.clean_oplet(&self.job_id, vertex.id());
        }
        tracing::info!("job {} closed {} oplets", self.job_id, self.vertices.len());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn each_vertex<'a>(
        &self,
        phase: &str,
        vertices: impl Iterator<Item = &'a Vertex>,
        mut f: impl FnMut(&Vertex) -> Result<()>,
    ) -> Result<()> {
        let mut failed = 0;
        for vertex in vertices {
            if let Err(err) = f(vertex) {
                let err = err.context(format!("{} failed to {}", vertex.id(), phase));
                tracing::error!("job {}: {:#}", self.job_id, err);
                self.state.report_failure(&err);
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{} oplet(s) failed to {}", failed, phase);
        }
        Ok(())
    }
}
