use std::cell::RefCell;
use std::convert::Infallible;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tuplecrab_core::config::JobConfig;
use tuplecrab_core::execution::{Cancellation, DirectJob, DirectProvider};
use tuplecrab_core::graph::{Edge, Graph, GraphError, Output, Snapshot, Vertex};
use tuplecrab_core::job::Job;
use tuplecrab_core::oplet::{
    Aggregate, Counter, Events, Isolate, Oplet, PeriodicControl, PeriodicSource, Pipe,
    ProcessSource, Sink, Sinker, Split, TupleCount, Union,
};
use tuplecrab_core::types::{Tuple, VertexId};
use tuplecrab_core::window::{Window, WindowConfig, WindowError, WindowKey, WindowPolicy};

use crate::tester::Tester;

/// Shared mutable state for building the graph.
pub(crate) struct TopologyInner {
    name: String,
    /// `None` once the topology has been submitted.
    graph: Option<Graph>,
}

/// The entry point for building a stream topology.
///
/// Add sources with [`of`](Self::of), [`poll`](Self::poll) or
/// [`events`](Self::events), chain transformations on the returned
/// [`TStream`], then hand the topology to a [`Submitter`].
///
/// A topology is submitted at most once; building on it afterwards panics.
#[derive(Clone)]
pub struct Topology {
    pub(crate) inner: Rc<RefCell<TopologyInner>>,
}

impl Topology {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(TopologyInner {
                name: name.into(),
                graph: Some(Graph::new()),
            })),
        }
    }

    pub fn name(&self) -> String {
        self.inner.borrow().name.clone()
    }

    /// Add any source oplet.
    pub fn source<O>(&self, oplet: O) -> TStream<O::Out>
    where
        O: Oplet<In = Infallible>,
    {
        let vertex = self
            .with_graph(|graph| graph.insert(oplet, 0, 1))
            .expect("source shape is 0/1");
        TStream::new(self, vertex, 0)
    }

    /// A stream of the given items, submitted in order from a source thread.
    pub fn of<T: Tuple>(&self, items: impl IntoIterator<Item = T>) -> TStream<T> {
        let items: Vec<T> = items.into_iter().collect();
        self.source(ProcessSource::from_iter(move || items))
    }

    /// A stream produced by `process` on its own thread. The function
    /// should return when it runs out of data or is cancelled.
    pub fn generate<T: Tuple>(
        &self,
        process: impl FnOnce(&Output<T>, &Cancellation) -> Result<()> + Send + 'static,
    ) -> TStream<T> {
        self.source(ProcessSource::new(process))
    }

    /// Poll `poller` every `period`; every `Some` becomes a tuple.
    pub fn poll<T: Tuple>(
        &self,
        period: Duration,
        poller: impl FnMut() -> Option<T> + Send + 'static,
    ) -> TStream<T> {
        self.poll_with_control(period, poller).0
    }

    /// Like [`poll`](Self::poll), also returning a handle that changes the
    /// period while the job runs.
    pub fn poll_with_control<T: Tuple>(
        &self,
        period: Duration,
        poller: impl FnMut() -> Option<T> + Send + 'static,
    ) -> (TStream<T>, PeriodicControl) {
        let source = PeriodicSource::new(period, poller);
        let control = source.control();
        (self.source(source), control)
    }

    /// A stream fed by an external event source. `setup` runs once when the
    /// job starts and receives the output to submit events to.
    pub fn events<T: Tuple>(
        &self,
        setup: impl FnOnce(Output<T>) -> Result<()> + Send + 'static,
    ) -> TStream<T> {
        self.source(Events::new(setup))
    }

    pub fn vertices(&self) -> Snapshot<Vertex> {
        self.with_graph(|graph| graph.vertices())
    }

    pub fn edges(&self) -> Snapshot<Edge> {
        self.with_graph(|graph| graph.edges())
    }

    pub fn is_submitted(&self) -> bool {
        self.inner.borrow().graph.is_none()
    }

    /// A test harness bound to this topology.
    pub fn tester(&self) -> Tester {
        Tester::new(self.clone())
    }

    /// Take the graph out for submission.
    pub fn take_graph(&self) -> Result<Graph> {
        let mut inner = self.inner.borrow_mut();
        let name = inner.name.clone();
        inner
            .graph
            .take()
            .ok_or_else(|| anyhow!("topology {} was already submitted", name))
    }

    fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let mut inner = self.inner.borrow_mut();
        let name = inner.name.clone();
        match inner.graph.as_mut() {
            Some(graph) => f(graph),
            None => panic!("topology {} was already submitted", name),
        }
    }
}

/// A typed stream: output `port` of `vertex`.
///
/// Every transformation adds a vertex downstream. Using the same stream
/// twice fans its tuples out to both consumers.
pub struct TStream<T> {
    topology: Topology,
    vertex: VertexId,
    port: usize,
    _tuple: PhantomData<fn() -> T>,
}

impl<T> Clone for TStream<T> {
    fn clone(&self) -> Self {
        Self {
            topology: self.topology.clone(),
            vertex: self.vertex,
            port: self.port,
            _tuple: PhantomData,
        }
    }
}

impl<T: Tuple> TStream<T> {
    fn new(topology: &Topology, vertex: VertexId, port: usize) -> Self {
        Self {
            topology: topology.clone(),
            vertex,
            port,
            _tuple: PhantomData,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// The vertex producing this stream.
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }

    pub fn port(&self) -> usize {
        self.port
    }

    /// Insert a 1/1 oplet fed by this stream.
    pub fn pipe<O>(&self, oplet: O) -> TStream<O::Out>
    where
        O: Oplet<In = T>,
    {
        let (source, port) = (self.vertex, self.port);
        let vertex = self
            .topology
            .with_graph(|graph| -> Result<VertexId, GraphError> {
                let vertex = graph.insert(oplet, 1, 1)?;
                graph.connect(source, port, vertex, 0)?;
                Ok(vertex)
            })
            .expect("1/1 oplet fed by a stream of its input type");
        TStream::new(&self.topology, vertex, 0)
    }

    pub fn map<U: Tuple>(&self, f: impl FnMut(T) -> U + Send + 'static) -> TStream<U> {
        self.pipe(Pipe::map(f))
    }

    pub fn filter(&self, predicate: impl FnMut(&T) -> bool + Send + 'static) -> TStream<T> {
        self.pipe(Pipe::filter(predicate))
    }

    /// Map each tuple to zero or one tuple.
    pub fn filter_map<U: Tuple>(
        &self,
        f: impl FnMut(T) -> Option<U> + Send + 'static,
    ) -> TStream<U> {
        self.pipe(Pipe::filter_map(f))
    }

    pub fn flat_map<U, It>(&self, f: impl FnMut(T) -> It + Send + 'static) -> TStream<U>
    where
        U: Tuple,
        It: IntoIterator<Item = U>,
    {
        self.pipe(Pipe::flat_map(f))
    }

    /// Observe each tuple without changing the stream.
    pub fn peek(&self, f: impl FnMut(&T) + Send + 'static) -> TStream<T> {
        self.pipe(Pipe::peek(f))
    }

    /// Count the tuples on this stream.
    pub fn counted(&self) -> (TStream<T>, TupleCount) {
        let counter = Counter::new();
        let count = counter.count();
        (self.pipe(counter), count)
    }

    /// Terminate the stream.
    pub fn sink(&self, sinker: impl Sinker<T>) -> TSink {
        self.sink_oplet(Sink::new(sinker))
    }

    /// Terminate the stream with a custom sink oplet.
    pub fn sink_oplet<O>(&self, oplet: O) -> TSink
    where
        O: Oplet<In = T, Out = Infallible>,
    {
        let (source, port) = (self.vertex, self.port);
        let vertex = self
            .topology
            .with_graph(|graph| -> Result<VertexId, GraphError> {
                let vertex = graph.insert(oplet, 1, 0)?;
                graph.connect(source, port, vertex, 0)?;
                Ok(vertex)
            })
            .expect("sink fed by a stream of its input type");
        TSink { vertex }
    }

    /// Route each tuple to one of `n` streams. The splitter returns the
    /// index, taken modulo `n`; a negative index drops the tuple.
    ///
    /// # Panics
    ///
    /// If `n` is zero.
    pub fn split(
        &self,
        n: usize,
        splitter: impl FnMut(&T) -> i64 + Send + 'static,
    ) -> Vec<TStream<T>> {
        assert!(n > 0, "split needs at least one output");
        let (source, port) = (self.vertex, self.port);
        let vertex = self
            .topology
            .with_graph(|graph| -> Result<VertexId, GraphError> {
                let vertex = graph.insert(Split::new(splitter), 1, n)?;
                graph.connect(source, port, vertex, 0)?;
                Ok(vertex)
            })
            .expect("split fed by a stream of its input type");
        (0..n)
            .map(|port| TStream::new(&self.topology, vertex, port))
            .collect()
    }

    /// Merge this stream with `others`.
    pub fn union(&self, others: &[TStream<T>]) -> TStream<T> {
        if others.is_empty() {
            return self.clone();
        }
        let feeds: Vec<(VertexId, usize)> = std::iter::once(self)
            .chain(others)
            .map(|stream| (stream.vertex, stream.port))
            .collect();
        let vertex = self
            .topology
            .with_graph(|graph| -> Result<VertexId, GraphError> {
                let vertex = graph.insert(Union::<T>::new(), feeds.len(), 1)?;
                for (input, (source, port)) in feeds.iter().enumerate() {
                    graph.connect(*source, *port, vertex, input)?;
                }
                Ok(vertex)
            })
            .expect("union of streams of one type");
        TStream::new(&self.topology, vertex, 0)
    }

    /// Decouple downstream processing onto its own thread.
    pub fn isolate(&self) -> TStream<T> {
        self.pipe(Isolate::new())
    }

    /// Isolate with a queue of at most `capacity` tuples.
    pub fn isolate_bounded(&self, capacity: usize) -> TStream<T> {
        self.pipe(Isolate::with_capacity(Some(capacity)))
    }

    /// Tag this stream's output port.
    pub fn tag<I, S>(&self, tags: I) -> TStream<T>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (vertex, port) = (self.vertex, self.port);
        self.topology
            .with_graph(|graph| graph.add_tags(vertex, port, tags))
            .expect("stream port exists");
        self.clone()
    }

    /// Set the alias of this stream's output port. Fails if one is set.
    pub fn alias(&self, alias: impl Into<String>) -> Result<TStream<T>, GraphError> {
        let (vertex, port) = (self.vertex, self.port);
        self.topology
            .with_graph(|graph| graph.set_alias(vertex, port, alias))?;
        Ok(self.clone())
    }

    /// Window of the last `count` tuples, processed on every insert.
    pub fn last(&self, count: usize) -> Result<TWindow<T, ()>, WindowError> {
        self.window(WindowConfig::new(WindowPolicy::last_count(count), false))
    }

    /// Window of the tuples received within `age`, processed on every insert.
    pub fn last_for(&self, age: Duration) -> Result<TWindow<T, ()>, WindowError> {
        self.window(WindowConfig::new(WindowPolicy::last_time(age), false))
    }

    /// Tumbling window of `count` tuples.
    pub fn batch(&self, count: usize) -> Result<TWindow<T, ()>, WindowError> {
        self.window(WindowConfig::new(WindowPolicy::batch_count(count), false))
    }

    /// Tumbling window emptied every `period`.
    pub fn batch_for(&self, period: Duration) -> Result<TWindow<T, ()>, WindowError> {
        self.window(WindowConfig::new(WindowPolicy::batch_time(period), false))
    }

    /// A single-partition window.
    pub fn window(&self, config: WindowConfig) -> Result<TWindow<T, ()>, WindowError> {
        Ok(TWindow {
            stream: self.clone(),
            window: Window::unpartitioned(config)?,
        })
    }

    /// A window with one partition per key.
    pub fn window_by<K: WindowKey>(
        &self,
        config: WindowConfig,
        key_fn: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Result<TWindow<T, K>, WindowError> {
        Ok(TWindow {
            stream: self.clone(),
            window: Window::new(config, key_fn)?,
        })
    }
}

/// A terminated stream.
#[derive(Debug, Clone, Copy)]
pub struct TSink {
    vertex: VertexId,
}

impl TSink {
    pub fn vertex(&self) -> VertexId {
        self.vertex
    }
}

/// A windowed view of a stream, turned back into a stream by
/// [`aggregate`](Self::aggregate) or [`batch`](Self::batch).
pub struct TWindow<T, K> {
    stream: TStream<T>,
    window: Window<T, K>,
}

impl<T: Tuple, K: WindowKey> TWindow<T, K> {
    pub fn window(&self) -> &Window<T, K> {
        &self.window
    }

    /// Reduce each firing partition; only `Some` results are emitted.
    pub fn aggregate<U: Tuple>(
        self,
        aggregator: impl FnMut(&[T], &K) -> Option<U> + Send + 'static,
    ) -> TStream<U> {
        self.stream.pipe(Aggregate::new(self.window, aggregator))
    }

    /// Reduce each firing partition to exactly one tuple.
    pub fn batch<U: Tuple>(
        self,
        mut batcher: impl FnMut(&[T], &K) -> U + Send + 'static,
    ) -> TStream<U> {
        self.aggregate(move |tuples: &[T], key: &K| Some(batcher(tuples, key)))
    }
}

/// Something that runs topologies.
pub trait Submitter {
    type Job: Job;

    /// Submit `topology` and wait at most `timeout` until its job is
    /// running.
    fn submit_topology(
        &self,
        topology: &Topology,
        config: &JobConfig,
        timeout: Duration,
    ) -> Result<Arc<Self::Job>>;
}

impl Submitter for DirectProvider {
    type Job = DirectJob;

    fn submit_topology(
        &self,
        topology: &Topology,
        config: &JobConfig,
        timeout: Duration,
    ) -> Result<Arc<DirectJob>> {
        let graph = topology.take_graph()?;
        self.submit(graph, &topology.name(), config)?.wait(timeout)
    }
}
