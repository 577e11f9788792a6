//! Partitioned windows: per-key bounded buffers whose contents are handed
//! to a processor whenever the window's policy fires.
//!
//! A [`Window`] knows nothing about aggregation. It owns the partitions,
//! applies the [`WindowPolicy`] on insertion and on timers, and passes an
//! ordered copy of a partition to the registered processor. The
//! [`Aggregate`](crate::oplet::Aggregate) oplet connects that processor to
//! a reduction function and an output port.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use ahash::AHashMap;
use anyhow::Result;

use crate::time::{Scheduler, TaskHandle, duration_ms};
use crate::types::{EventTime, Tuple};

mod partition;
mod partitioned;
mod policy;
mod triggers;

pub use partition::*;
pub use partitioned::*;
pub use policy::*;
pub use triggers::*;

#[derive(Debug, thiserror::Error)]
pub enum WindowError {
    #[error("window size must be at least 1")]
    ZeroCount,
    #[error("window durations must be positive")]
    ZeroDuration,
    #[error("a sliding window needs a count or an age bound")]
    Unbounded,
    #[error("time-based window has no scheduler registered")]
    NoScheduler,
    #[error("window processing failed: {0:#}")]
    Processing(anyhow::Error),
}

#[cfg(test)]
#[path = "tests/window_tests.rs"]
mod tests;
