//! Running graphs: the executable built from a submitted graph, the jobs
//! controlling it and the provider that submits them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Serialize;

use crate::config::JobConfig;
use crate::context::{
    ContextParts, JOB_REGISTRY, SCHEDULER, THREAD_SPAWNER, ServiceRegistry,
};
use crate::graph::{Graph, GraphError, Vertex};
use crate::job::{Action, Health, Job, JobError, JobState, JobStatus, State};
use crate::oplet::{ErasedCounter, OpletKind, TupleCount};
use crate::time::{
    ActivityTracker, ErrorHook, Scheduler, SchedulerHooks, ThreadScheduler, run_guarded,
};
use crate::types::{JobId, VertexId};

mod direct;
mod executable;
mod instrument;
mod registry;
mod spawner;

pub use direct::*;
pub use executable::*;
pub use instrument::*;
pub use registry::*;
pub use spawner::*;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

fn next_job_id() -> JobId {
    format!("job-{}", NEXT_JOB_ID.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
#[path = "tests/execution_tests.rs"]
mod tests;
