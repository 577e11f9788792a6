//! # tuplecrab API
//!
//! Fluent builder for stream topologies and a harness for testing them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use tuplecrab_api::topology::Topology;
//! use tuplecrab_core::config::JobConfig;
//! use tuplecrab_core::execution::DirectProvider;
//!
//! let topology = Topology::new("wordlengths");
//! let lengths = topology
//!     .of(vec!["hello world".to_string(), "hello tuplecrab".to_string()])
//!     .flat_map(|line: String| {
//!         line.split_whitespace().map(|w| w.len()).collect::<Vec<_>>()
//!     });
//!
//! let tester = topology.tester();
//! let done = tester.tuple_count(&lengths, 4);
//! let ok = tester
//!     .complete(&DirectProvider::new(), &JobConfig::default(), done.as_ref(), Duration::from_secs(5))
//!     .unwrap();
//! assert!(ok);
//! ```
//!
//! - [`topology`]: [`Topology`](topology::Topology), [`TStream`](topology::TStream)
//!   and [`TWindow`](topology::TWindow), plus the [`Submitter`](topology::Submitter)
//!   trait implemented by the direct provider.
//! - [`tester`]: [`Tester`](tester::Tester) and the stock end conditions.

pub mod tester;
pub mod topology;

pub use tuplecrab_core;
