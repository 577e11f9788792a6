use super::*;

type Splitter<T> = Box<dyn FnMut(&T) -> i64 + Send>;

/// One input, N outputs. The splitter picks the output for each tuple as
/// `index % N`; a negative index drops the tuple.
pub struct Split<T> {
    splitter: Option<Splitter<T>>,
    outputs: Vec<Output<T>>,
}

impl<T: Tuple> Split<T> {
    pub fn new(splitter: impl FnMut(&T) -> i64 + Send + 'static) -> Self {
        Self {
            splitter: Some(Box::new(splitter)),
            outputs: Vec::new(),
        }
    }
}

impl<T: Tuple> Oplet for Split<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Split
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        self.outputs = ctx.outputs();
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        let Some(splitter) = self.splitter.as_mut() else {
            return Ok(());
        };
        let index = splitter(&tuple);
        if index < 0 || self.outputs.is_empty() {
            return Ok(());
        }
        let port = (index as u64 % self.outputs.len() as u64) as usize;
        self.outputs[port].submit(tuple);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.splitter = None;
        Ok(())
    }
}

/// N inputs, one output: merges streams of the same type in arrival order.
pub struct Union<T> {
    output: Option<Output<T>>,
    _tuple: PhantomData<fn(T)>,
}

impl<T: Tuple> Union<T> {
    pub fn new() -> Self {
        Self {
            output: None,
            _tuple: PhantomData,
        }
    }
}

impl<T: Tuple> Default for Union<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Tuple> Oplet for Union<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Union
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        self.output = Some(single_output(ctx)?);
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        if let Some(out) = &self.output {
            out.submit(tuple);
        }
        Ok(())
    }
}
