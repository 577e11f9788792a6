use super::*;

/// Terminal consumer of a stream.
pub trait Sinker<T>: Send + 'static {
    fn sink(&mut self, tuple: T) -> Result<()>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T, F> Sinker<T> for F
where
    F: FnMut(T) -> Result<()> + Send + 'static,
{
    fn sink(&mut self, tuple: T) -> Result<()> {
        self(tuple)
    }
}

type Resolver<T> =
    Box<dyn FnOnce(&OpletContext<Infallible>) -> Option<Box<dyn Sinker<T>>> + Send>;

enum SinkerSlot<T> {
    Ready(Box<dyn Sinker<T>>),
    Deferred(Resolver<T>),
    Unresolved,
}

/// One input, no outputs. Hands every tuple to a [`Sinker`].
pub struct Sink<T> {
    slot: SinkerSlot<T>,
}

impl<T: Tuple> Sink<T> {
    pub fn new(sinker: impl Sinker<T>) -> Self {
        Self {
            slot: SinkerSlot::Ready(Box::new(sinker)),
        }
    }

    /// A sink whose sinker is chosen at initialization, typically from a
    /// service. When `resolve` returns `None` tuples are dropped.
    pub fn deferred(
        resolve: impl FnOnce(&OpletContext<Infallible>) -> Option<Box<dyn Sinker<T>>>
        + Send
        + 'static,
    ) -> Self {
        Self {
            slot: SinkerSlot::Deferred(Box::new(resolve)),
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self {
            slot: SinkerSlot::Unresolved,
        }
    }
}

impl<T: Tuple> Oplet for Sink<T> {
    type In = T;
    type Out = Infallible;

    fn kind(&self) -> OpletKind {
        OpletKind::Sink
    }

    fn initialize(&mut self, ctx: &OpletContext<Infallible>) -> Result<()> {
        self.slot = match std::mem::replace(&mut self.slot, SinkerSlot::Unresolved) {
            SinkerSlot::Deferred(resolve) => match resolve(ctx) {
                Some(sinker) => SinkerSlot::Ready(sinker),
                None => {
                    tracing::debug!("{}: no sinker resolved, tuples will be dropped", ctx.id());
                    SinkerSlot::Unresolved
                }
            },
            slot => slot,
        };
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        match &mut self.slot {
            SinkerSlot::Ready(sinker) => sinker.sink(tuple),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.slot, SinkerSlot::Unresolved) {
            SinkerSlot::Ready(mut sinker) => sinker.close(),
            _ => Ok(()),
        }
    }
}
