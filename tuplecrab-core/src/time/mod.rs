//! Clocks, timers and the schedulers that drive periodic sources and
//! time-based windows.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow, bail};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::types::EventTime;

mod activity;
mod clock;
mod manual;
mod scheduler;
mod thread_scheduler;
mod timer_service;

pub use activity::*;
pub use clock::*;
pub use manual::*;
pub use scheduler::*;
pub use thread_scheduler::*;
pub use timer_service::*;

/// Convert a duration to whole milliseconds on a [`Clock`], saturating.
pub fn duration_ms(d: Duration) -> EventTime {
    d.as_millis().min(EventTime::MAX as u128) as EventTime
}

#[cfg(test)]
#[path = "tests/time_tests.rs"]
mod tests;
