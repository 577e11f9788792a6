//! The graph model: vertices holding oplets, output ports wired to input
//! ports, and the edges recording that wiring.
//!
//! A [`Graph`] is mutable while it is being built and becomes the
//! executable of a job when submitted. Readers only ever see immutable
//! [`Snapshot`]s of its vertex and edge lists.

use std::collections::{BTreeSet, VecDeque};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use ahash::AHashSet;
use anyhow::Result;

use crate::context::ContextParts;
use crate::oplet::{Erased, ErasedOplet, Oplet, OpletKind};
use crate::time::ErrorHook;
use crate::types::{BoxedValue, Tuple, TupleType, VertexId};

mod cell;
mod port;
mod snapshot;

pub use cell::*;
pub use port::*;
pub use snapshot::*;

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: VertexId,
    pub source_port: usize,
    pub target: VertexId,
    pub target_port: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("unknown vertex {0}")]
    UnknownVertex(VertexId),
    #[error("{kind:?} oplet cannot have {inputs} input(s) and {outputs} output(s)")]
    PortShape {
        kind: OpletKind,
        inputs: usize,
        outputs: usize,
    },
    #[error("output port {port} out of range for {vertex} ({count} outputs)")]
    OutputPortOutOfRange {
        vertex: VertexId,
        port: usize,
        count: usize,
    },
    #[error("input port {port} out of range for {vertex} ({count} inputs)")]
    InputPortOutOfRange {
        vertex: VertexId,
        port: usize,
        count: usize,
    },
    #[error("input port {port} of {vertex} is already connected")]
    InputPortConnected { vertex: VertexId, port: usize },
    #[error("tuple type mismatch: {found} cannot flow into a port of {expected}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("output port {port} of {vertex} already has alias {alias:?}")]
    AliasAlreadySet {
        vertex: VertexId,
        port: usize,
        alias: String,
    },
}

/// Vertices and edges of a topology.
///
/// Inserting an oplet moves it into the graph, so one oplet instance can
/// never back two vertices:
///
/// ```compile_fail
/// use tuplecrab_core::graph::Graph;
/// use tuplecrab_core::oplet::Pipe;
///
/// let mut graph = Graph::new();
/// let pipe = Pipe::map(|x: i32| x + 1);
/// graph.insert(pipe, 1, 1).unwrap();
/// graph.insert(pipe, 1, 1).unwrap(); // use of moved value
/// ```
#[derive(Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    connected: AHashSet<(VertexId, usize)>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex running `oplet` with the given port counts.
    pub fn insert<O: Oplet>(
        &mut self,
        oplet: O,
        inputs: usize,
        outputs: usize,
    ) -> Result<VertexId, GraphError> {
        let kind = oplet.kind();
        self.insert_erased(
            kind,
            TupleType::of::<O::In>(),
            TupleType::of::<O::Out>(),
            inputs,
            outputs,
            Box::new(Erased(oplet)),
        )
    }

    pub(crate) fn insert_erased(
        &mut self,
        kind: OpletKind,
        input_type: TupleType,
        output_type: TupleType,
        inputs: usize,
        outputs: usize,
        oplet: Box<dyn ErasedOplet>,
    ) -> Result<VertexId, GraphError> {
        if !kind.accepts_shape(inputs, outputs) {
            return Err(GraphError::PortShape {
                kind,
                inputs,
                outputs,
            });
        }
        let id = VertexId::new(self.vertices.len() as u32);
        let cell = OpletCell::new(id, oplet, inputs, outputs, output_type);
        self.vertices.push(Vertex {
            id,
            kind,
            input_type,
            output_type,
            inputs,
            outputs,
            cell: Arc::new(cell),
        });
        Ok(id)
    }

    /// Wire output `source_port` of `source` to input `target_port` of `target`.
    pub fn connect(
        &mut self,
        source: VertexId,
        source_port: usize,
        target: VertexId,
        target_port: usize,
    ) -> Result<Edge, GraphError> {
        let src = self.vertex(source)?;
        let tgt = self.vertex(target)?;
        if source_port >= src.outputs {
            return Err(GraphError::OutputPortOutOfRange {
                vertex: source,
                port: source_port,
                count: src.outputs,
            });
        }
        if target_port >= tgt.inputs {
            return Err(GraphError::InputPortOutOfRange {
                vertex: target,
                port: target_port,
                count: tgt.inputs,
            });
        }
        if self.connected.contains(&(target, target_port)) {
            return Err(GraphError::InputPortConnected {
                vertex: target,
                port: target_port,
            });
        }
        if src.output_type != tgt.input_type {
            return Err(GraphError::TypeMismatch {
                expected: tgt.input_type.name(),
                found: src.output_type.name(),
            });
        }

        src.cell.outputs[source_port].add_target(InputPort::new(&tgt.cell, target_port));
        let edge = Edge {
            source,
            source_port,
            target,
            target_port,
        };
        self.connected.insert((target, target_port));
        self.edges.push(edge);
        Ok(edge)
    }

    /// Splice `oplet` between output `port` of `vertex` and everything that
    /// port currently feeds. The oplet must pass tuples of the port's type
    /// through unchanged in type.
    pub fn peek<O: Oplet>(
        &mut self,
        vertex: VertexId,
        port: usize,
        oplet: O,
    ) -> Result<VertexId, GraphError> {
        let port_type = self.output_port(vertex, port)?.tuple_type();
        for found in [TupleType::of::<O::In>(), TupleType::of::<O::Out>()] {
            if found != port_type {
                return Err(GraphError::TypeMismatch {
                    expected: port_type.name(),
                    found: found.name(),
                });
            }
        }

        let kind = oplet.kind();
        self.splice(vertex, port, kind, Box::new(Erased(oplet)))
    }

    /// Splice a 1/1 vertex running `oplet` after output `port` of `vertex`.
    /// The caller guarantees `oplet` passes the port's tuple type through.
    pub(crate) fn splice(
        &mut self,
        vertex: VertexId,
        port: usize,
        kind: OpletKind,
        oplet: Box<dyn ErasedOplet>,
    ) -> Result<VertexId, GraphError> {
        let source_port = Arc::clone(self.output_port(vertex, port)?);
        let port_type = source_port.tuple_type();
        let peek = self.insert_erased(kind, port_type, port_type, 1, 1, oplet)?;
        let peek_cell = Arc::clone(&self.vertex(peek)?.cell);
        peek_cell.outputs[0].set_targets(source_port.take_targets());
        source_port.add_target(InputPort::new(&peek_cell, 0));

        for edge in &mut self.edges {
            if edge.source == vertex && edge.source_port == port {
                edge.source = peek;
                edge.source_port = 0;
            }
        }
        self.edges.push(Edge {
            source: vertex,
            source_port: port,
            target: peek,
            target_port: 0,
        });
        self.connected.insert((peek, 0));
        Ok(peek)
    }

    /// Set the alias of an output port. An alias can be set only once.
    pub fn set_alias(
        &mut self,
        vertex: VertexId,
        port: usize,
        alias: impl Into<String>,
    ) -> Result<(), GraphError> {
        let output = self.output_port(vertex, port)?;
        output
            .set_alias(alias.into())
            .map_err(|existing| GraphError::AliasAlreadySet {
                vertex,
                port,
                alias: existing,
            })
    }

    /// Add tags to an output port.
    pub fn add_tags<I, S>(
        &mut self,
        vertex: VertexId,
        port: usize,
        tags: I,
    ) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_port(vertex, port)?
            .add_tags(tags.into_iter().map(Into::into));
        Ok(())
    }

    /// Snapshot of the vertices in insertion order.
    pub fn vertices(&self) -> Snapshot<Vertex> {
        Snapshot::from(self.vertices.clone())
    }

    /// Snapshot of the edges in insertion order.
    pub fn edges(&self) -> Snapshot<Edge> {
        Snapshot::from(self.edges.clone())
    }

    pub fn vertex(&self, id: VertexId) -> Result<&Vertex, GraphError> {
        self.vertices
            .get(id.0 as usize)
            .ok_or(GraphError::UnknownVertex(id))
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Vertices fed by `id`, in edge order.
    pub fn downstream(&self, id: VertexId) -> Vec<VertexId> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target)
            .collect()
    }

    /// Vertices feeding `id`, in edge order.
    pub fn upstream(&self, id: VertexId) -> Vec<VertexId> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source)
            .collect()
    }

    /// Vertices with no incoming edges.
    pub fn sources(&self) -> Vec<VertexId> {
        self.vertices
            .iter()
            .map(|v| v.id)
            .filter(|id| !self.edges.iter().any(|e| e.target == *id))
            .collect()
    }

    /// Vertices ordered so that every vertex comes after the vertices that
    /// feed it. Ties go to the lower id; vertices on a cycle are appended in
    /// insertion order.
    pub fn topo_order(&self) -> Vec<VertexId> {
        let n = self.vertices.len();
        let mut in_degree = vec![0usize; n];
        let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
        for edge in &self.edges {
            in_degree[edge.target.0 as usize] += 1;
            adj[edge.source.0 as usize].push(edge.target.0 as usize);
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = vec![false; n];
        let mut order = Vec::with_capacity(n);
        while let Some(next) = ready.pop_first() {
            visited[next] = true;
            order.push(VertexId::new(next as u32));
            for &target in &adj[next] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.insert(target);
                }
            }
        }
        order.extend(
            (0..n)
                .filter(|&i| !visited[i])
                .map(|i| VertexId::new(i as u32)),
        );
        order
    }

    fn output_port(
        &self,
        vertex: VertexId,
        port: usize,
    ) -> Result<&Arc<OutputPort>, GraphError> {
        let v = self.vertex(vertex)?;
        v.cell
            .outputs
            .get(port)
            .ok_or(GraphError::OutputPortOutOfRange {
                vertex,
                port,
                count: v.outputs,
            })
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertices)
            .field("edges", &self.edges)
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/graph_tests.rs"]
mod tests;
