use super::*;

/// Explicit handle on one input port of a vertex.
///
/// Holds the target weakly so that cyclic graphs do not keep themselves
/// alive once the job is dropped.
#[derive(Clone)]
pub(crate) struct InputPort {
    cell: Weak<OpletCell>,
    port: usize,
}

impl InputPort {
    pub(crate) fn new(cell: &Arc<OpletCell>, port: usize) -> Self {
        Self {
            cell: Arc::downgrade(cell),
            port,
        }
    }

    fn deliver(&self, tuple: BoxedValue) {
        if let Some(cell) = self.cell.upgrade() {
            cell.deliver(self.port, tuple);
        }
    }
}

/// One output port of a vertex: its downstream targets plus the alias and
/// tags attached to the stream it carries.
pub(crate) struct OutputPort {
    tuple_type: TupleType,
    targets: RwLock<Vec<InputPort>>,
    alias: OnceLock<String>,
    tags: RwLock<BTreeSet<String>>,
}

impl OutputPort {
    pub(crate) fn new(tuple_type: TupleType) -> Self {
        Self {
            tuple_type,
            targets: RwLock::new(Vec::new()),
            alias: OnceLock::new(),
            tags: RwLock::new(BTreeSet::new()),
        }
    }

    pub(crate) fn tuple_type(&self) -> TupleType {
        self.tuple_type
    }

    pub(crate) fn add_target(&self, target: InputPort) {
        self.targets
            .write()
            .expect("output targets poisoned")
            .push(target);
    }

    pub(crate) fn take_targets(&self) -> Vec<InputPort> {
        std::mem::take(&mut *self.targets.write().expect("output targets poisoned"))
    }

    pub(crate) fn set_targets(&self, targets: Vec<InputPort>) {
        *self.targets.write().expect("output targets poisoned") = targets;
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self
            .targets
            .read()
            .expect("output targets poisoned")
            .is_empty()
    }

    /// Deliver `tuple` to every target. Each target but the last gets a
    /// clone; with no targets the tuple is discarded.
    pub(crate) fn submit(&self, tuple: BoxedValue) {
        let targets = self.targets.read().expect("output targets poisoned");
        if let Some((last, rest)) = targets.split_last() {
            for target in rest {
                target.deliver(tuple.clone());
            }
            last.deliver(tuple);
        }
    }

    /// Returns the existing alias if one is already set.
    pub(crate) fn set_alias(&self, alias: String) -> Result<(), String> {
        if let Some(existing) = self.alias.get() {
            return Err(existing.clone());
        }
        self.alias
            .set(alias)
            .map_err(|_| self.alias.get().cloned().unwrap_or_default())
    }

    pub(crate) fn alias(&self) -> Option<String> {
        self.alias.get().cloned()
    }

    pub(crate) fn add_tags(&self, tags: impl Iterator<Item = String>) {
        self.tags.write().expect("output tags poisoned").extend(tags);
    }

    pub(crate) fn tags(&self) -> BTreeSet<String> {
        self.tags.read().expect("output tags poisoned").clone()
    }
}

/// Typed handle an oplet uses to submit tuples on one of its output ports.
pub struct Output<T> {
    port: Arc<OutputPort>,
    _tuple: PhantomData<fn(T)>,
}

impl<T: Tuple> Output<T> {
    pub(crate) fn new(port: Arc<OutputPort>) -> Self {
        Self {
            port,
            _tuple: PhantomData,
        }
    }

    /// Push `tuple` downstream. Failures in downstream oplets are reported
    /// to the job, not to the caller.
    pub fn submit(&self, tuple: T) {
        self.port.submit(BoxedValue::new(tuple));
    }

    pub fn is_connected(&self) -> bool {
        self.port.is_connected()
    }

    pub fn alias(&self) -> Option<String> {
        self.port.alias()
    }

    pub fn tags(&self) -> BTreeSet<String> {
        self.port.tags()
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            port: Arc::clone(&self.port),
            _tuple: PhantomData,
        }
    }
}
