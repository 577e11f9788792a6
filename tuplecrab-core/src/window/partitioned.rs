use super::*;

/// Bounds required of partition keys.
pub trait WindowKey: Hash + Eq + Clone + Send + Sync + 'static {}

impl<K> WindowKey for K where K: Hash + Eq + Clone + Send + Sync + 'static {}

type KeyFn<T, K> = Box<dyn Fn(&T) -> K + Send + Sync>;

/// Receives an ordered copy of a partition and its key when the partition
/// fires.
pub type PartitionProcessor<T, K> = Arc<dyn Fn(Vec<T>, &K) -> Result<()> + Send + Sync>;

/// A window partitioned by key.
///
/// Cloning yields another handle on the same window. With a scheduler
/// registered, processing is queued on it; otherwise the processor runs on
/// the inserting thread. Either way a partition is processed in the order
/// its triggers fired.
pub struct Window<T, K> {
    inner: Arc<WindowInner<T, K>>,
}

struct WindowInner<T, K> {
    config: WindowConfig,
    key_fn: KeyFn<T, K>,
    partitions: RwLock<AHashMap<K, Arc<Mutex<Partition<T>>>>>,
    processor: RwLock<Option<PartitionProcessor<T, K>>>,
    scheduler: RwLock<Option<Arc<dyn Scheduler>>>,
    closed: AtomicBool,
}

impl<T: Tuple> Window<T, ()> {
    /// A window with a single partition.
    pub fn unpartitioned(config: WindowConfig) -> Result<Self, WindowError> {
        Self::new(config, |_| ())
    }
}

impl<T: Tuple, K: WindowKey> Window<T, K> {
    pub fn new(
        config: WindowConfig,
        key_fn: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Result<Self, WindowError> {
        config.policy.validate()?;
        Ok(Self {
            inner: Arc::new(WindowInner {
                config,
                key_fn: Box::new(key_fn),
                partitions: RwLock::new(AHashMap::new()),
                processor: RwLock::new(None),
                scheduler: RwLock::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> WindowConfig {
        self.inner.config
    }

    pub fn requires_scheduler(&self) -> bool {
        self.inner.config.policy.requires_scheduler()
    }

    pub fn register_partition_processor(
        &self,
        processor: impl Fn(Vec<T>, &K) -> Result<()> + Send + Sync + 'static,
    ) {
        *self.inner.processor.write().expect("processor poisoned") = Some(Arc::new(processor));
    }

    pub fn register_scheduler(&self, scheduler: Arc<dyn Scheduler>) {
        *self.inner.scheduler.write().expect("scheduler poisoned") = Some(scheduler);
    }

    /// Add `tuple` to its partition and apply the policy.
    ///
    /// Inserting into a closed window, or one whose scheduler has shut
    /// down, is a no-op.
    pub fn insert(&self, tuple: T) -> Result<(), WindowError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let scheduler = inner.scheduler();
        // The job is shutting down; treat the window as closed.
        if scheduler.as_ref().is_some_and(|s| s.is_shutdown()) {
            return Ok(());
        }
        if scheduler.is_none() && self.requires_scheduler() {
            return Err(WindowError::NoScheduler);
        }
        let now = scheduler.as_ref().map_or(0, |s| s.now());

        let key = (inner.key_fn)(&tuple);
        let partition = inner.partition(&key);
        let mut part = partition.lock().expect("partition poisoned");
        part.tuples.push_back((tuple, now));
        let result = on_insert(&inner.config.policy, &mut part, now);
        WindowInner::arm_timer(inner, &key, &mut part, scheduler.as_ref(), now, false)?;
        inner.apply(result, &key, &mut part, scheduler.as_ref())
    }

    /// Copy of a partition's contents, oldest first.
    pub fn partition_contents(&self, key: &K) -> Option<Vec<T>> {
        self.inner
            .lookup(key)
            .map(|p| p.lock().expect("partition poisoned").contents())
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner
            .partitions
            .read()
            .expect("partitions poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn partition_count(&self) -> usize {
        self.inner
            .partitions
            .read()
            .expect("partitions poisoned")
            .len()
    }

    /// Cancel timers, drop all partitions and the processor. Later
    /// insertions are ignored.
    pub fn close(&self) {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let partitions: Vec<_> = inner
            .partitions
            .write()
            .expect("partitions poisoned")
            .drain()
            .map(|(_, p)| p)
            .collect();
        for partition in partitions {
            let mut part = partition.lock().expect("partition poisoned");
            part.cancel_timer();
            part.tuples.clear();
        }
        inner.processor.write().expect("processor poisoned").take();
    }
}

impl<T, K> Clone for Window<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Tuple, K: WindowKey> WindowInner<T, K> {
    fn scheduler(&self) -> Option<Arc<dyn Scheduler>> {
        self.scheduler.read().expect("scheduler poisoned").clone()
    }

    fn processor(&self) -> Option<PartitionProcessor<T, K>> {
        self.processor.read().expect("processor poisoned").clone()
    }

    fn lookup(&self, key: &K) -> Option<Arc<Mutex<Partition<T>>>> {
        self.partitions
            .read()
            .expect("partitions poisoned")
            .get(key)
            .cloned()
    }

    fn partition(&self, key: &K) -> Arc<Mutex<Partition<T>>> {
        if let Some(partition) = self.lookup(key) {
            return partition;
        }
        Arc::clone(
            self.partitions
                .write()
                .expect("partitions poisoned")
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Partition::new()))),
        )
    }

    /// Act on a trigger result for a locked partition.
    fn apply(
        &self,
        result: TriggerResult,
        key: &K,
        part: &mut Partition<T>,
        scheduler: Option<&Arc<dyn Scheduler>>,
    ) -> Result<(), WindowError> {
        let contents = match result {
            TriggerResult::Continue => return Ok(()),
            TriggerResult::Fire => part.contents(),
            TriggerResult::FireAndPurge => part.drain(),
        };
        if contents.is_empty() && !self.config.fire_empty {
            return Ok(());
        }
        let Some(processor) = self.processor() else {
            return Ok(());
        };
        match scheduler {
            Some(scheduler) => {
                let key = key.clone();
                scheduler
                    .execute(Box::new(move || processor(contents, &key)))
                    .map_err(WindowError::Processing)?;
            }
            None => processor(contents, key).map_err(WindowError::Processing)?,
        }
        Ok(())
    }

    /// Schedule the partition's next timer if the policy needs one and none
    /// is pending. `after_fire` is set when called from the timer itself.
    fn arm_timer(
        this: &Arc<Self>,
        key: &K,
        part: &mut Partition<T>,
        scheduler: Option<&Arc<dyn Scheduler>>,
        now: EventTime,
        after_fire: bool,
    ) -> Result<(), WindowError> {
        if part.timer.is_some() {
            return Ok(());
        }
        let Some(scheduler) = scheduler else {
            return Ok(());
        };
        let weak = Arc::downgrade(this);
        let fire = {
            let key = key.clone();
            move || match weak.upgrade() {
                Some(inner) => WindowInner::fire_timer(&inner, &key),
                None => Ok(()),
            }
        };

        let handle = match this.config.policy {
            WindowPolicy::Sliding {
                trigger: Trigger::Every(period),
                ..
            } => Some(scheduler.schedule_at_fixed_rate(period, period, Arc::new(fire))),
            WindowPolicy::Sliding {
                age: Some(age),
                trigger: Trigger::OnInsert,
                ..
            } => part.oldest().map(|oldest| {
                let due = (oldest + duration_ms(age) - now).max(0) as u64;
                scheduler.schedule(Duration::from_millis(due), Box::new(fire))
            }),
            WindowPolicy::TimeBatch(period)
                if !part.tuples.is_empty() || (after_fire && this.config.fire_empty) =>
            {
                Some(scheduler.schedule(period, Box::new(fire)))
            }
            _ => None,
        };
        part.timer = handle.transpose().map_err(WindowError::Processing)?;
        Ok(())
    }

    fn fire_timer(this: &Arc<Self>, key: &K) -> Result<()> {
        if this.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(partition) = this.lookup(key) else {
            return Ok(());
        };
        let scheduler = this.scheduler();
        let now = scheduler.as_ref().map_or(0, |s| s.now());
        let mut part = partition.lock().expect("partition poisoned");

        let periodic = matches!(
            this.config.policy,
            WindowPolicy::Sliding {
                trigger: Trigger::Every(_),
                ..
            }
        );
        if !periodic {
            part.timer = None;
        }
        let result = on_timer(&this.config.policy, &mut part, now);
        this.apply(result, key, &mut part, scheduler.as_ref())?;
        if !periodic {
            Self::arm_timer(this, key, &mut part, scheduler.as_ref(), now, true)?;
        }
        Ok(())
    }
}
