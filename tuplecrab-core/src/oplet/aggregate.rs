use super::*;
use crate::window::{Window, WindowKey};

type Aggregator<T, K, U> = Box<dyn FnMut(&[T], &K) -> Option<U> + Send>;

/// Drives a [`Window`]: accepted tuples are inserted, and every time a
/// partition fires its contents are reduced by the aggregation function.
/// Only `Some` results are submitted. Initialization fails without a
/// scheduler service.
pub struct Aggregate<T, K, U> {
    window: Window<T, K>,
    aggregator: Arc<Mutex<Option<Aggregator<T, K, U>>>>,
}

impl<T: Tuple, K: WindowKey, U: Tuple> Aggregate<T, K, U> {
    pub fn new(
        window: Window<T, K>,
        aggregator: impl FnMut(&[T], &K) -> Option<U> + Send + 'static,
    ) -> Self {
        Self {
            window,
            aggregator: Arc::new(Mutex::new(Some(Box::new(aggregator)))),
        }
    }

    pub fn window(&self) -> &Window<T, K> {
        &self.window
    }
}

impl<T: Tuple, K: WindowKey, U: Tuple> Oplet for Aggregate<T, K, U> {
    type In = T;
    type Out = U;

    fn kind(&self) -> OpletKind {
        OpletKind::Aggregate
    }

    fn initialize(&mut self, ctx: &OpletContext<U>) -> Result<()> {
        // Partitions are always processed off the delivering thread.
        let scheduler = ctx
            .scheduler()
            .ok_or_else(|| anyhow!("aggregate requires a scheduler service"))?;
        self.window.register_scheduler(scheduler);
        let output = single_output(ctx)?;
        let aggregator = Arc::clone(&self.aggregator);
        self.window
            .register_partition_processor(move |tuples: Vec<T>, key: &K| {
                let mut aggregator = aggregator.lock().expect("aggregator poisoned");
                if let Some(result) = aggregator.as_mut().and_then(|f| f(&tuples, key)) {
                    output.submit(result);
                }
                Ok(())
            });
        Ok(())
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        self.window.insert(tuple)?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.window.close();
        self.aggregator.lock().expect("aggregator poisoned").take();
        Ok(())
    }
}
