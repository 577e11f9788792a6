use super::*;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::time::run_guarded;

thread_local! {
    // Cells currently inside `accept` on this thread.
    static DELIVERING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks a cell as delivering on the current thread. `None` when the cell
/// is already delivering here, i.e. a tuple looped back without passing
/// through an isolate.
struct DeliveryGuard(usize);

impl DeliveryGuard {
    fn enter(cell: &OpletCell) -> Option<Self> {
        let addr = cell as *const OpletCell as usize;
        DELIVERING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&addr) {
                return None;
            }
            stack.push(addr);
            Some(Self(addr))
        })
    }
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        DELIVERING.with(|stack| stack.borrow_mut().retain(|a| *a != self.0));
    }
}

/// Runtime holder of one vertex's oplet.
///
/// `accept` calls are serialized by the cell's lock. Errors raised while
/// processing a tuple are logged and handed to the job's fault hook; the
/// tuple is not retried.
pub struct OpletCell {
    id: VertexId,
    oplet: Mutex<Box<dyn ErasedOplet>>,
    inputs: usize,
    pub(crate) outputs: Vec<Arc<OutputPort>>,
    closed: AtomicBool,
    faults: OnceLock<ErrorHook>,
}

impl OpletCell {
    pub(crate) fn new(
        id: VertexId,
        oplet: Box<dyn ErasedOplet>,
        inputs: usize,
        outputs: usize,
        output_type: TupleType,
    ) -> Self {
        Self {
            id,
            oplet: Mutex::new(oplet),
            inputs,
            outputs: (0..outputs)
                .map(|_| Arc::new(OutputPort::new(output_type)))
                .collect(),
            closed: AtomicBool::new(false),
            faults: OnceLock::new(),
        }
    }

    pub fn id(&self) -> VertexId {
        self.id
    }

    pub(crate) fn input_count(&self) -> usize {
        self.inputs
    }

    /// Install the hook receiving this vertex's runtime errors. Only the
    /// first hook is kept.
    pub(crate) fn set_fault_hook(&self, hook: ErrorHook) {
        let _ = self.faults.set(hook);
    }

    pub(crate) fn report(&self, err: anyhow::Error) {
        tracing::warn!("oplet {} failed: {:#}", self.id, err);
        if let Some(hook) = self.faults.get() {
            hook(&err);
        }
    }

    pub(crate) fn deliver(&self, port: usize, tuple: BoxedValue) {
        let Some(_guard) = DeliveryGuard::enter(self) else {
            self.report(anyhow::anyhow!(
                "tuple looped back into {} on the same thread; cycles need an isolate",
                self.id
            ));
            return;
        };
        let result = {
            let mut oplet = self.lock();
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            run_guarded(|| oplet.accept(port, tuple))
        };
        if let Err(err) = result {
            self.report(err.context(format!(
                "{} failed to accept a tuple on port {}",
                self.id, port
            )));
        }
    }

    pub(crate) fn initialize(&self, parts: ContextParts) -> Result<()> {
        let mut oplet = self.lock();
        run_guarded(|| oplet.initialize(parts))
    }

    pub(crate) fn start(&self) -> Result<()> {
        let mut oplet = self.lock();
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        run_guarded(|| oplet.start())
    }

    /// Close the oplet. Only the first call reaches the oplet.
    pub(crate) fn close(&self) -> Result<()> {
        let mut oplet = self.lock();
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        run_guarded(|| oplet.close())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Box<dyn ErasedOplet>> {
        // A panic inside an oplet is already reported; keep serving the vertex.
        self.oplet
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// A vertex of a [`Graph`]: one oplet plus its declared ports.
#[derive(Clone)]
pub struct Vertex {
    pub(crate) id: VertexId,
    pub(crate) kind: OpletKind,
    pub(crate) input_type: TupleType,
    pub(crate) output_type: TupleType,
    pub(crate) inputs: usize,
    pub(crate) outputs: usize,
    pub(crate) cell: Arc<OpletCell>,
}

impl Vertex {
    pub fn id(&self) -> VertexId {
        self.id
    }

    pub fn kind(&self) -> OpletKind {
        self.kind
    }

    pub fn input_count(&self) -> usize {
        self.inputs
    }

    pub fn output_count(&self) -> usize {
        self.outputs
    }

    pub fn input_type(&self) -> TupleType {
        self.input_type
    }

    pub fn output_type(&self) -> TupleType {
        self.output_type
    }

    pub fn output_alias(&self, port: usize) -> Option<String> {
        self.cell.outputs.get(port).and_then(|p| p.alias())
    }

    pub fn output_tags(&self, port: usize) -> BTreeSet<String> {
        self.cell
            .outputs
            .get(port)
            .map(|p| p.tags())
            .unwrap_or_default()
    }

    /// Whether output `port` feeds at least one input.
    pub fn is_output_connected(&self, port: usize) -> bool {
        self.cell
            .outputs
            .get(port)
            .is_some_and(|p| p.is_connected())
    }

    pub(crate) fn cell(&self) -> &Arc<OpletCell> {
        &self.cell
    }
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}
