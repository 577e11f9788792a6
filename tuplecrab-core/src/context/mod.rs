//! What an oplet sees of its surroundings: the job it belongs to, its
//! output ports and the services registered for the job.

use std::any::Any;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use ahash::AHashMap;
use anyhow::{Result, anyhow};

use crate::execution::{JobRegistry, ThreadSpawner};
use crate::graph::{Output, OutputPort};
use crate::time::Scheduler;
use crate::types::{JobId, Tuple, VertexId};

mod oplet_context;
mod service;

pub use oplet_context::*;
pub use service::*;

#[cfg(test)]
#[path = "tests/context_tests.rs"]
mod tests;
