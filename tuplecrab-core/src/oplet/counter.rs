use super::*;

/// Shared view of a [`Counter`]'s tally.
#[derive(Debug, Clone, Default)]
pub struct TupleCount(Arc<AtomicU64>);

impl TupleCount {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A peek that counts the tuples passing through it.
pub struct Counter<T> {
    count: TupleCount,
    output: Option<Output<T>>,
}

impl<T: Tuple> Counter<T> {
    pub fn new() -> Self {
        Self {
            count: TupleCount::default(),
            output: None,
        }
    }

    pub fn count(&self) -> TupleCount {
        self.count.clone()
    }
}

impl<T: Tuple> Default for Counter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Tuple> Oplet for Counter<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Peek
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        self.output = Some(single_output(ctx)?);
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        self.count.0.fetch_add(1, Ordering::Relaxed);
        if let Some(out) = &self.output {
            out.submit(tuple);
        }
        Ok(())
    }
}

/// Counter spliced onto ports whose tuple type is only known at runtime.
pub(crate) struct ErasedCounter {
    count: TupleCount,
    output: Option<Arc<OutputPort>>,
}

impl ErasedCounter {
    pub(crate) fn new(count: TupleCount) -> Self {
        Self {
            count,
            output: None,
        }
    }
}

impl ErasedOplet for ErasedCounter {
    fn initialize(&mut self, parts: ContextParts) -> Result<()> {
        self.output = parts.outputs.first().cloned();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: BoxedValue) -> Result<()> {
        self.count.0.fetch_add(1, Ordering::Relaxed);
        if let Some(out) = &self.output {
            out.submit(tuple);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
