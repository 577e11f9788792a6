use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use tuplecrab_core::config::JobConfig;
use tuplecrab_core::job::{Action, Job, JobError, State};
use tuplecrab_core::types::Tuple;

use crate::topology::{Submitter, TStream, Topology};

/// Shortest wait [`Tester::complete`] will use.
pub const MIN_COMPLETION_TIMEOUT: Duration = Duration::from_secs(1);
/// How often [`Tester::complete`] re-evaluates its end condition.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CLOSE_POLL: Duration = Duration::from_millis(10);

/// A predicate that ends a test run.
pub trait EndCondition: Send + Sync {
    fn valid(&self) -> bool;
}

/// An end condition that also exposes what it observed.
pub trait Condition: EndCondition {
    type Output;

    fn result(&self) -> Self::Output;
}

/// Counts the tuples on a stream.
#[derive(Debug)]
pub struct CountCondition {
    seen: AtomicU64,
    expected: u64,
    exact: bool,
}

impl CountCondition {
    fn observe(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }
}

impl EndCondition for CountCondition {
    fn valid(&self) -> bool {
        let seen = self.seen.load(Ordering::Relaxed);
        if self.exact {
            seen == self.expected
        } else {
            seen >= self.expected
        }
    }
}

impl Condition for CountCondition {
    type Output = u64;

    fn result(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }
}

/// Records the tuples on a stream and compares them with the expected ones.
#[derive(Debug)]
pub struct ContentsCondition<T> {
    seen: Mutex<Vec<T>>,
    expected: Vec<T>,
    ordered: bool,
}

impl<T: Clone> ContentsCondition<T> {
    fn observe(&self, tuple: &T) {
        self.seen.lock().expect("contents poisoned").push(tuple.clone());
    }
}

impl<T: PartialEq + Send + Sync> EndCondition for ContentsCondition<T> {
    fn valid(&self) -> bool {
        let seen = self.seen.lock().expect("contents poisoned");
        if self.ordered {
            return *seen == self.expected;
        }
        if seen.len() != self.expected.len() {
            return false;
        }
        let mut unmatched: Vec<&T> = self.expected.iter().collect();
        seen.iter().all(|tuple| {
            match unmatched.iter().position(|candidate| *candidate == tuple) {
                Some(i) => {
                    unmatched.swap_remove(i);
                    true
                }
                None => false,
            }
        })
    }
}

impl<T: Clone + PartialEq + Send + Sync> Condition for ContentsCondition<T> {
    type Output = Vec<T>;

    fn result(&self) -> Vec<T> {
        self.seen.lock().expect("contents poisoned").clone()
    }
}

/// Holds when every condition holds. Evaluation stops at the first one
/// that does not.
pub struct AllOf {
    conditions: Vec<Arc<dyn EndCondition>>,
}

impl EndCondition for AllOf {
    fn valid(&self) -> bool {
        self.conditions.iter().all(|condition| condition.valid())
    }
}

impl Condition for AllOf {
    type Output = bool;

    fn result(&self) -> bool {
        self.valid()
    }
}

/// Submits a topology and waits for an end condition.
///
/// Conditions are attached to streams with [`tuple_count`](Self::tuple_count)
/// and friends before the topology is submitted.
pub struct Tester {
    topology: Topology,
}

impl Tester {
    pub(crate) fn new(topology: Topology) -> Self {
        Self { topology }
    }

    /// Holds when exactly `expected` tuples have been seen on `stream`.
    pub fn tuple_count<T: Tuple>(&self, stream: &TStream<T>, expected: u64) -> Arc<CountCondition> {
        self.count(stream, expected, true)
    }

    /// Holds once at least `expected` tuples have been seen on `stream`.
    pub fn at_least_tuple_count<T: Tuple>(
        &self,
        stream: &TStream<T>,
        expected: u64,
    ) -> Arc<CountCondition> {
        self.count(stream, expected, false)
    }

    /// Holds when `stream` has carried exactly `expected`, in order.
    pub fn stream_contents<T>(
        &self,
        stream: &TStream<T>,
        expected: Vec<T>,
    ) -> Arc<ContentsCondition<T>>
    where
        T: Tuple + PartialEq + Debug + Sync,
    {
        self.contents(stream, expected, true)
    }

    /// Holds when `stream` has carried exactly `expected`, in any order.
    pub fn contents_unordered<T>(
        &self,
        stream: &TStream<T>,
        expected: Vec<T>,
    ) -> Arc<ContentsCondition<T>>
    where
        T: Tuple + PartialEq + Debug + Sync,
    {
        self.contents(stream, expected, false)
    }

    pub fn and(&self, conditions: Vec<Arc<dyn EndCondition>>) -> Arc<AllOf> {
        Arc::new(AllOf { conditions })
    }

    /// Submit the topology, waiting up to `timeout` (at least
    /// [`MIN_COMPLETION_TIMEOUT`]) for it to start. Then poll every
    /// [`POLL_INTERVAL`] until `end` holds, the job closes, or `timeout`
    /// passes again. The job is closed before
    /// returning. Returns whether `end` held.
    pub fn complete<S: Submitter>(
        &self,
        submitter: &S,
        config: &JobConfig,
        end: &dyn EndCondition,
        timeout: Duration,
    ) -> Result<bool> {
        let timeout = timeout.max(MIN_COMPLETION_TIMEOUT);
        let job = submitter.submit_topology(&self.topology, config, timeout)?;
        let deadline = Instant::now() + timeout;

        loop {
            if end.valid() || job.current_state() == State::Closed {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::info!("job {}: end condition not met within {:?}", job.id(), timeout);
                break;
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        }

        let valid = end.valid();
        close_job(job.as_ref(), config.close_timeout())?;
        Ok(valid)
    }

    fn count<T: Tuple>(&self, stream: &TStream<T>, expected: u64, exact: bool) -> Arc<CountCondition> {
        let condition = Arc::new(CountCondition {
            seen: AtomicU64::new(0),
            expected,
            exact,
        });
        let observer = Arc::clone(&condition);
        stream.sink(move |_: T| -> Result<()> {
            observer.observe();
            Ok(())
        });
        condition
    }

    fn contents<T>(&self, stream: &TStream<T>, expected: Vec<T>, ordered: bool) -> Arc<ContentsCondition<T>>
    where
        T: Tuple + PartialEq + Debug + Sync,
    {
        let condition = Arc::new(ContentsCondition {
            seen: Mutex::new(Vec::new()),
            expected,
            ordered,
        });
        let observer = Arc::clone(&condition);
        stream.sink(move |tuple: T| -> Result<()> {
            observer.observe(&tuple);
            Ok(())
        });
        condition
    }
}

fn close_job<J: Job + ?Sized>(job: &J, timeout: Duration) -> Result<()> {
    match job.state_change(Action::Close) {
        Ok(()) => {}
        Err(JobError::InTransition { next: State::Closed, .. }) => {}
        Err(err) => return Err(err.into()),
    }
    let deadline = Instant::now() + timeout;
    while job.current_state() != State::Closed {
        if Instant::now() >= deadline {
            tracing::warn!("job {} did not close within {:?}", job.id(), timeout);
            return Err(JobError::Timeout(timeout).into());
        }
        thread::sleep(CLOSE_POLL);
    }
    Ok(())
}
