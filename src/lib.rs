//! modelbench - threads vs processes vs coroutines
//!
//! Times the same two workloads under three concurrency models and reports
//! the wall-clock results side by side:
//!
//! - **CPU-bound**: a synthetic accumulator loop per task
//! - **I/O-bound**: one loopback TCP echo exchange per task
//!
//! # Architecture
//!
//! - **Engines**: OS thread pool, forked processes, single-threaded
//!   coroutines, all sharing one bounded-window scheduling policy
//! - **Reactor**: a raw epoll wrapper with one-shot registrations that drives
//!   the I/O coroutines
//! - **Echo server**: thread-per-connection loopback peer for the I/O runs
//! - **Harness**: warmup and measured repeats, median/min/max summaries,
//!   Markdown or JSON reports

pub mod bench;
pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod reactor;
pub mod server;
pub mod stats;
pub mod util;
pub mod workload;

// Re-export commonly used types
pub use config::BenchConfig;
pub use engine::{Engine, Model, RunStats};
pub use error::{ReactorError, TaskError};

/// Result type used throughout modelbench
pub type Result<T> = anyhow::Result<T>;
