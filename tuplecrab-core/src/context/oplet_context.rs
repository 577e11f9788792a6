use super::*;

/// Runtime data handed to a vertex at initialization.
pub(crate) struct ContextParts {
    pub(crate) vertex: VertexId,
    pub(crate) job_id: JobId,
    pub(crate) job_name: String,
    pub(crate) services: Arc<ServiceRegistry>,
    pub(crate) inputs: usize,
    pub(crate) outputs: Vec<Arc<OutputPort>>,
}

/// Context passed to [`Oplet::initialize`](crate::oplet::Oplet::initialize).
///
/// `O` is the oplet's output tuple type.
pub struct OpletContext<O> {
    parts: ContextParts,
    _out: PhantomData<fn(O)>,
}

impl<O: Tuple> OpletContext<O> {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            parts,
            _out: PhantomData,
        }
    }

    /// Id of the vertex running this oplet.
    pub fn id(&self) -> VertexId {
        self.parts.vertex
    }

    pub fn job_id(&self) -> &str {
        &self.parts.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.parts.job_name
    }

    /// Look up a service; `None` when nothing is registered under `key`.
    pub fn service<T>(&self, key: &ServiceKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.parts.services.get(key)
    }

    pub fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.service(&SCHEDULER)
    }

    pub fn thread_spawner(&self) -> Option<Arc<ThreadSpawner>> {
        self.service(&THREAD_SPAWNER)
    }

    pub fn input_count(&self) -> usize {
        self.parts.inputs
    }

    pub fn output_count(&self) -> usize {
        self.parts.outputs.len()
    }

    pub fn output(&self, port: usize) -> Result<Output<O>> {
        self.parts
            .outputs
            .get(port)
            .map(|p| Output::new(Arc::clone(p)))
            .ok_or_else(|| {
                anyhow!(
                    "{} has no output port {} ({} outputs)",
                    self.parts.vertex,
                    port,
                    self.parts.outputs.len()
                )
            })
    }

    pub fn outputs(&self) -> Vec<Output<O>> {
        self.parts
            .outputs
            .iter()
            .map(|p| Output::new(Arc::clone(p)))
            .collect()
    }

    pub fn output_alias(&self, port: usize) -> Option<String> {
        self.parts.outputs.get(port).and_then(|p| p.alias())
    }

    pub fn output_tags(&self, port: usize) -> BTreeSet<String> {
        self.parts
            .outputs
            .get(port)
            .map(|p| p.tags())
            .unwrap_or_default()
    }

    /// A name unique to this vertex of this job, e.g. for thread names.
    pub fn uniquify(&self, name: &str) -> String {
        format!("{}.{}.{}", self.parts.job_id, self.parts.vertex, name)
    }
}
