use std::any::{Any, TypeId};

use anyhow::{Result, anyhow};

/// Milliseconds on a [`Clock`](crate::time::Clock).
pub type EventTime = i64;

/// Identifier of a submitted job, e.g. `job-3`.
pub type JobId = String;

/// Trait bound for values flowing along graph edges.
///
/// Fan-out clones a tuple once per extra target, and tuples cross thread
/// boundaries between sources, isolates and the scheduler.
pub trait Tuple: Clone + Send + 'static {}

// Blanket implementation: any type satisfying the bounds is a Tuple.
impl<T> Tuple for T where T: Clone + Send + 'static {}

/// Unique identifier for a vertex within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub u32);

impl VertexId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op_{}", self.0)
    }
}

/// Runtime type of the tuples carried by a port.
///
/// Compared by `TypeId`; the name is kept for error messages.
#[derive(Debug, Clone, Copy)]
pub struct TupleType {
    id: TypeId,
    name: &'static str,
}

impl TupleType {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TupleType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TupleType {}

// --- Tuples on graph edges ---

/// Object-safe view of a tuple: edges fan a tuple out to several
/// receivers, so it must clone without knowing its type.
pub trait ErasedTuple: Any + Send {
    fn clone_erased(&self) -> Box<dyn ErasedTuple>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T: Clone + Send + 'static> ErasedTuple for T {
    fn clone_erased(&self) -> Box<dyn ErasedTuple> {
        Box::new(self.clone())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

/// A tuple in flight between two vertices. Each vertex turns it back into
/// its declared input type on `accept`.
pub struct BoxedValue {
    tuple: Box<dyn ErasedTuple>,
    type_name: &'static str,
}

impl BoxedValue {
    pub fn new<T: Tuple>(tuple: T) -> Self {
        Self {
            tuple: Box::new(tuple),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.tuple.as_any().downcast_ref()
    }

    /// Port types are checked when edges are connected, so a mismatch here
    /// means a vertex was wired around the graph API.
    pub fn downcast<T: 'static>(self) -> Result<T> {
        let carried = self.type_name;
        self.tuple
            .into_any()
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| {
                anyhow!(
                    "tuple type mismatch: expected {}, got {}",
                    std::any::type_name::<T>(),
                    carried
                )
            })
    }
}

impl Clone for BoxedValue {
    fn clone(&self) -> Self {
        Self {
            tuple: self.tuple.clone_erased(),
            type_name: self.type_name,
        }
    }
}

impl std::fmt::Debug for BoxedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxedValue<{}>", self.type_name)
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
