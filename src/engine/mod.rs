//! Concurrency engine abstraction
//!
//! An engine runs one workload (`tasks` work items, at most `concurrency` of
//! them in flight) under a single concurrency model and returns once every
//! task has reached a terminal state. The harness times each call; engines
//! never share state across invocations.
//!
//! # Engine Types
//!
//! - **Threads**: a fixed pool of OS threads claiming tasks from an atomic
//!   cursor (see [`thread`])
//! - **Processes**: one forked child per task, windowed by
//!   launched/completed counts (see [`process`])
//! - **Coroutines**: single-threaded cooperative state machines, round-robin
//!   for CPU work and epoll-driven for I/O (see [`coroutine`] and [`io_task`])
//!
//! # Example
//!
//! ```no_run
//! use modelbench::config::WorkloadConfig;
//! use modelbench::engine::{create_engine, Model};
//! use modelbench::workload::WorkloadKind;
//!
//! let workload = WorkloadConfig { tasks: 100, concurrency: 8, ..Default::default() };
//! let mut engine = create_engine(Model::Coroutines);
//! let stats = engine.run(&workload, WorkloadKind::Cpu)?;
//! assert_eq!(stats.completed, 100);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod coroutine;
pub mod io_task;
pub mod process;
pub mod thread;
pub mod window;

use crate::config::WorkloadConfig;
use crate::workload::WorkloadKind;
use crate::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Concurrency engine trait
///
/// # Contract
///
/// - Exactly `workload.tasks` tasks are launched and observed terminal
/// - No more than `workload.concurrency` tasks are in flight at any instant
/// - A task-level failure never aborts the run; it is counted in
///   [`RunStats::failed`]
///
/// # Errors
///
/// Environment failures (fork or thread spawn refused, reactor errors) abort
/// the run. Reactor failures surface as [`crate::error::ReactorError`] in the
/// error chain.
pub trait Engine: Send {
    /// The model this engine implements
    fn model(&self) -> Model;

    /// Run the workload to completion
    fn run(&mut self, workload: &WorkloadConfig, kind: WorkloadKind) -> Result<RunStats>;
}

/// Concurrency model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// OS threads
    Threads,
    /// Forked OS processes
    Processes,
    /// Single-threaded cooperative coroutines
    Coroutines,
}

impl Model {
    /// All models, in report order
    pub const ALL: [Model; 3] = [Model::Threads, Model::Processes, Model::Coroutines];
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Model::Threads => write!(f, "threads"),
            Model::Processes => write!(f, "processes"),
            Model::Coroutines => write!(f, "coroutines"),
        }
    }
}

/// Diagnostics from one engine invocation
///
/// The report only shows wall time; these counts exist so tests and debug
/// logs can confirm the run did what it claims.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Tasks that reached a terminal state (success or failure)
    pub completed: u64,
    /// Tasks that ended in failure
    pub failed: u64,
    /// Largest number of tasks observed in flight at once
    pub peak_in_flight: usize,
    /// XOR of CPU task results; absent for I/O runs and for processes
    pub checksum: Option<u32>,
}

impl RunStats {
    /// Tasks that completed successfully
    pub fn succeeded(&self) -> u64 {
        self.completed - self.failed
    }
}

/// Create the engine for a model
pub fn create_engine(model: Model) -> Box<dyn Engine> {
    match model {
        Model::Threads => Box::new(thread::ThreadEngine::new()),
        Model::Processes => Box::new(process::ProcessEngine::new()),
        Model::Coroutines => Box::new(coroutine::CoroutineEngine::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_models() {
        for model in Model::ALL {
            assert_eq!(create_engine(model).model(), model);
        }
    }

    #[test]
    fn test_model_display_matches_cli_names() {
        for model in Model::ALL {
            let parsed = Model::from_str(&model.to_string(), false).unwrap();
            assert_eq!(parsed, model);
        }
    }

    #[test]
    fn test_succeeded() {
        let stats = RunStats {
            completed: 10,
            failed: 3,
            peak_in_flight: 3,
            checksum: None,
        };
        assert_eq!(stats.succeeded(), 7);
    }
}
