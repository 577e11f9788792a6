use super::*;

type PipeFn<I, O> = Box<dyn FnMut(I, &Output<O>) -> Result<()> + Send>;

/// One input, one output. Each accepted tuple yields zero or more output
/// tuples.
pub struct Pipe<I, O> {
    kind: OpletKind,
    function: Option<PipeFn<I, O>>,
    output: Option<Output<O>>,
}

impl<I: Tuple, O: Tuple> Pipe<I, O> {
    /// A pipe driven by `f`, which may submit any number of tuples.
    pub fn new(f: impl FnMut(I, &Output<O>) -> Result<()> + Send + 'static) -> Self {
        Self {
            kind: OpletKind::Pipe,
            function: Some(Box::new(f)),
            output: None,
        }
    }

    pub fn map(mut f: impl FnMut(I) -> O + Send + 'static) -> Self {
        Self::new(move |tuple, out| {
            out.submit(f(tuple));
            Ok(())
        })
    }

    /// Like [`map`](Self::map), but `None` results are dropped.
    pub fn filter_map(mut f: impl FnMut(I) -> Option<O> + Send + 'static) -> Self {
        Self::new(move |tuple, out| {
            if let Some(mapped) = f(tuple) {
                out.submit(mapped);
            }
            Ok(())
        })
    }

    /// A map whose failures are reported to the job.
    pub fn try_map(mut f: impl FnMut(I) -> Result<O> + Send + 'static) -> Self {
        Self::new(move |tuple, out| {
            out.submit(f(tuple)?);
            Ok(())
        })
    }

    pub fn flat_map<It>(mut f: impl FnMut(I) -> It + Send + 'static) -> Self
    where
        It: IntoIterator<Item = O>,
    {
        Self::new(move |tuple, out| {
            for mapped in f(tuple) {
                out.submit(mapped);
            }
            Ok(())
        })
    }
}

impl<T: Tuple> Pipe<T, T> {
    pub fn filter(mut predicate: impl FnMut(&T) -> bool + Send + 'static) -> Self {
        Self::new(move |tuple, out| {
            if predicate(&tuple) {
                out.submit(tuple);
            }
            Ok(())
        })
    }

    /// Observe tuples without changing the stream.
    pub fn peek(mut f: impl FnMut(&T) + Send + 'static) -> Self {
        Self {
            kind: OpletKind::Peek,
            ..Self::new(move |tuple, out| {
                f(&tuple);
                out.submit(tuple);
                Ok(())
            })
        }
    }
}

impl<I: Tuple, O: Tuple> Oplet for Pipe<I, O> {
    type In = I;
    type Out = O;

    fn kind(&self) -> OpletKind {
        self.kind
    }

    fn initialize(&mut self, ctx: &OpletContext<O>) -> Result<()> {
        self.output = Some(single_output(ctx)?);
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: I) -> Result<()> {
        match (self.function.as_mut(), self.output.as_ref()) {
            (Some(f), Some(out)) => f(tuple, out),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.function = None;
        Ok(())
    }
}
