use super::*;

/// Typed name of a service.
///
/// Two keys with the same name address the same slot; looking a service
/// up under a key of the wrong type yields `None`.
pub struct ServiceKey<T> {
    name: &'static str,
    _service: PhantomData<fn() -> T>,
}

impl<T> ServiceKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _service: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for ServiceKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ServiceKey<T> {}

impl<T> std::fmt::Debug for ServiceKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceKey({})", self.name)
    }
}

/// The job's scheduler, shared by periodic sources, events sources and windows.
pub const SCHEDULER: ServiceKey<Arc<dyn Scheduler>> = ServiceKey::new("tuplecrab.scheduler");

/// Spawns the job's long-running source and isolate threads.
pub const THREAD_SPAWNER: ServiceKey<Arc<ThreadSpawner>> =
    ServiceKey::new("tuplecrab.thread_spawner");

/// Provider-wide record of submitted jobs.
pub const JOB_REGISTRY: ServiceKey<Arc<JobRegistry>> = ServiceKey::new("tuplecrab.job_registry");

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("service {0} is already registered")]
    AlreadyRegistered(&'static str),
}

/// Called with `(job id, vertex id)` when a vertex of a job is closed.
pub type Cleaner = Arc<dyn Fn(&str, VertexId) + Send + Sync>;

/// A map from service name to service instance.
///
/// A registry may have a parent; lookups that miss locally fall through to
/// it, so job services shadow provider services of the same name.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<AHashMap<&'static str, Box<dyn Any + Send + Sync>>>,
    cleaners: Mutex<Vec<Cleaner>>,
    parent: Option<Arc<ServiceRegistry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Arc<ServiceRegistry>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Register `service` under `key`. Fails if the name is taken in this
    /// registry; a parent's entry is shadowed, not an error.
    pub fn add<T>(&self, key: &ServiceKey<T>, service: T) -> Result<(), ServiceError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut services = self.services.write().expect("services poisoned");
        if services.contains_key(key.name) {
            return Err(ServiceError::AlreadyRegistered(key.name));
        }
        services.insert(key.name, Box::new(service));
        Ok(())
    }

    /// Register `service` under `key`, returning the entry it replaced.
    pub fn replace<T>(&self, key: &ServiceKey<T>, service: T) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services
            .write()
            .expect("services poisoned")
            .insert(key.name, Box::new(service))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T>(&self, key: &ServiceKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let local = self
            .services
            .read()
            .expect("services poisoned")
            .get(key.name)
            .map(|service| service.downcast_ref::<T>().cloned());
        match local {
            Some(Some(service)) => Some(service),
            Some(None) => {
                tracing::debug!("service {} is registered with another type", key.name);
                None
            }
            None => self.parent.as_ref().and_then(|parent| parent.get(key)),
        }
    }

    /// Remove the local entry for `key`.
    pub fn remove<T>(&self, key: &ServiceKey<T>) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.services
            .write()
            .expect("services poisoned")
            .remove(key.name)
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn contains<T>(&self, key: &ServiceKey<T>) -> bool {
        self.services
            .read()
            .expect("services poisoned")
            .contains_key(key.name)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.contains(key))
    }

    /// Register a callback run whenever a vertex is closed.
    pub fn add_cleaner(&self, cleaner: Cleaner) {
        self.cleaners.lock().expect("cleaners poisoned").push(cleaner);
    }

    /// Run the cleaners of this registry, then those of its parents.
    pub fn clean_oplet(&self, job_id: &str, vertex: VertexId) {
        let cleaners = self.cleaners.lock().expect("cleaners poisoned").clone();
        for cleaner in cleaners {
            cleaner(job_id, vertex);
        }
        if let Some(parent) = &self.parent {
            parent.clean_oplet(job_id, vertex);
        }
    }
}
