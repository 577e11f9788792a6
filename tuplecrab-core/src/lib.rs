//! # TupleCrab Core
//!
//! In-process stream topology engine.
//!
//! - [`types`]: tuple bounds, vertex ids and the type-erased
//!   [`BoxedValue`](types::BoxedValue) that travels along edges.
//! - [`graph`]: the [`Graph`](graph::Graph) of vertices, ports and edges.
//! - [`oplet`]: the [`Oplet`](oplet::Oplet) lifecycle and the stock
//!   sources, pipes, sinks, routers and the windowed
//!   [`Aggregate`](oplet::Aggregate).
//! - [`window`]: partitioned windows with count and time policies.
//! - [`context`]: per-oplet context and the service registry.
//! - [`job`]: job states, actions, health and the transition rules.
//! - [`execution`]: executables, [`DirectJob`](execution::DirectJob) and
//!   the [`DirectProvider`](execution::DirectProvider) that submits graphs.
//! - [`time`]: clocks and the schedulers driving periodic work.
//! - [`config`]: per-job configuration.

pub mod config;
pub mod context;
pub mod execution;
pub mod graph;
pub mod job;
pub mod oplet;
pub mod time;
pub mod types;
pub mod window;
