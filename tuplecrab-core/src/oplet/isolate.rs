use super::*;
use crate::execution::ThreadSpawner;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

const ISOLATE_POLL: Duration = Duration::from_millis(100);

/// Decouples its upstream from its downstream: accepted tuples are queued
/// and submitted from a dedicated thread.
pub struct Isolate<T> {
    capacity: Option<usize>,
    sender: Option<Sender<T>>,
    receiver: Option<Receiver<T>>,
    output: Option<Output<T>>,
    spawner: Option<Arc<ThreadSpawner>>,
    thread_name: String,
}

impl<T: Tuple> Isolate<T> {
    /// An isolate with an unbounded queue.
    pub fn new() -> Self {
        Self::with_capacity(None)
    }

    /// With `Some(n)` the upstream blocks while `n` tuples are queued.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            sender: None,
            receiver: None,
            output: None,
            spawner: None,
            thread_name: String::new(),
        }
    }
}

impl<T: Tuple> Default for Isolate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Tuple> Oplet for Isolate<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OpletKind {
        OpletKind::Isolate
    }

    fn initialize(&mut self, ctx: &OpletContext<T>) -> Result<()> {
        let (sender, receiver) = match self.capacity {
            Some(n) => crossbeam_channel::bounded(n),
            None => crossbeam_channel::unbounded(),
        };
        self.sender = Some(sender);
        self.receiver = Some(receiver);
        self.spawner = Some(
            ctx.thread_spawner()
                .context("isolate requires a thread spawner service")?,
        );
        self.output = Some(single_output(ctx)?);
        self.thread_name = ctx.uniquify("isolate");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let (Some(spawner), Some(output), Some(receiver)) =
            (self.spawner.as_ref(), self.output.clone(), self.receiver.take())
        else {
            return Err(anyhow!("isolate was not initialized"));
        };
        spawner.spawn(&self.thread_name, move |cancel| {
            while !cancel.is_cancelled() {
                match receiver.recv_timeout(ISOLATE_POLL) {
                    Ok(tuple) => output.submit(tuple),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            Ok(())
        })
    }

    fn accept(&mut self, _port: usize, tuple: T) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(tuple)
                .map_err(|_| anyhow!("isolate queue is closed")),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.sender = None;
        self.receiver = None;
        Ok(())
    }
}
