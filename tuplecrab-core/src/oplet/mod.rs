//! Oplets: the units of computation placed at graph vertices.
//!
//! Every oplet implements the same lifecycle, [`Oplet`]; the kinds differ
//! in the port shapes they accept and in where their work runs:
//!
//! - sources ([`PeriodicSource`], [`ProcessSource`], [`Events`]) have no
//!   inputs and submit from the scheduler or a dedicated thread,
//! - [`Pipe`] transforms one input stream into one output stream,
//! - [`Sink`] terminates a stream,
//! - [`Split`], [`Union`] and [`Isolate`] route tuples,
//! - [`Aggregate`] drives a [`Window`](crate::window::Window).

use std::convert::Infallible;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::context::{ContextParts, OpletContext};
use crate::execution::Cancellation;
use crate::graph::{Output, OutputPort};
use crate::time::{Scheduler, TaskHandle};
use crate::types::{BoxedValue, Tuple};

mod aggregate;
mod counter;
mod isolate;
mod pipe;
mod routing;
mod sink;
mod source;

pub use aggregate::*;
pub use counter::*;
pub use isolate::*;
pub use pipe::*;
pub use routing::*;
pub use sink::*;
pub use source::*;

/// The closed set of oplet kinds. The kind fixes which port shapes a
/// vertex may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpletKind {
    Source,
    Pipe,
    Sink,
    Aggregate,
    Split,
    Union,
    Isolate,
    Peek,
}

impl OpletKind {
    pub fn accepts_shape(self, inputs: usize, outputs: usize) -> bool {
        match self {
            OpletKind::Source => inputs == 0 && outputs == 1,
            OpletKind::Sink => inputs == 1 && outputs == 0,
            OpletKind::Pipe | OpletKind::Aggregate | OpletKind::Isolate | OpletKind::Peek => {
                inputs == 1 && outputs == 1
            }
            OpletKind::Split => inputs == 1 && outputs >= 1,
            OpletKind::Union => inputs >= 1 && outputs == 1,
        }
    }
}

/// A processing stage.
///
/// The runtime calls `initialize` once, then `start`, then `accept` for
/// every tuple arriving on an input port, and finally `close` exactly once,
/// even when earlier calls failed. Calls on one oplet never overlap.
pub trait Oplet: Send + 'static {
    /// Tuple type of the input ports. Sources use [`Infallible`].
    type In: Tuple;
    /// Tuple type of the output ports. Sinks use [`Infallible`].
    type Out: Tuple;

    fn kind(&self) -> OpletKind;

    fn initialize(&mut self, _ctx: &OpletContext<Self::Out>) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn accept(&mut self, port: usize, tuple: Self::In) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Object-safe view of an [`Oplet`] working on boxed tuples.
pub(crate) trait ErasedOplet: Send {
    fn initialize(&mut self, parts: ContextParts) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn accept(&mut self, port: usize, tuple: BoxedValue) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub(crate) struct Erased<O>(pub(crate) O);

impl<O: Oplet> ErasedOplet for Erased<O> {
    fn initialize(&mut self, parts: ContextParts) -> Result<()> {
        self.0.initialize(&OpletContext::new(parts))
    }

    fn start(&mut self) -> Result<()> {
        self.0.start()
    }

    fn accept(&mut self, port: usize, tuple: BoxedValue) -> Result<()> {
        let tuple = tuple.downcast::<O::In>()?;
        self.0.accept(port, tuple)
    }

    fn close(&mut self) -> Result<()> {
        self.0.close()
    }
}

/// Fetch output 0, the only output of most oplets.
fn single_output<O: Tuple>(ctx: &OpletContext<O>) -> Result<Output<O>> {
    ctx.output(0)
}

#[cfg(test)]
#[path = "tests/oplet_tests.rs"]
mod tests;
