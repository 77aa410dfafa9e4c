//! Configuration module
//!
//! Handles CLI argument parsing, normalization and validation. There is no
//! configuration file and no environment lookup: every knob arrives as a flag.

pub mod cli;
pub mod validator;

use crate::engine::Model;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Complete benchmark configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Workload descriptor handed to every engine invocation
///
/// Immutable for the duration of one engine run. All three concurrency models
/// receive the same descriptor so their timings are comparable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadConfig {
    /// Total number of work items per engine invocation
    pub tasks: usize,
    /// Maximum number of work items in flight at once
    pub concurrency: usize,
    /// Iterations of the synthetic CPU loop per task
    pub cpu_units: u32,
    /// Bytes sent (and echoed back) per I/O task
    pub payload_size: usize,
    /// Socket timeout for blocking models, per-task deadline for the reactor
    pub timeout_ms: u64,
}

impl WorkloadConfig {
    /// Timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            tasks: 2000,
            concurrency: 200,
            cpu_units: 200_000,
            payload_size: 256,
            timeout_ms: 20_000,
        }
    }
}

/// Repetition settings for the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Measured runs per model
    pub repeats: usize,
    /// Unmeasured runs before measuring
    pub warmup: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            repeats: 5,
            warmup: 1,
        }
    }
}

/// Echo server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// listen(2) backlog
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { backlog: 4096 }
    }
}

/// Which benchmark categories to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Suite {
    /// CPU-bound benchmark only
    Cpu,
    /// I/O-bound benchmark only
    Io,
    /// Both categories
    All,
}

impl Suite {
    pub fn includes_cpu(self) -> bool {
        matches!(self, Suite::Cpu | Suite::All)
    }

    pub fn includes_io(self) -> bool {
        matches!(self, Suite::Io | Suite::All)
    }
}

impl Default for Suite {
    fn default() -> Self {
        Self::All
    }
}

/// Report format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Markdown
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub suite: Suite,
    /// Models to benchmark, in report order
    pub models: Vec<Model>,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            suite: Suite::default(),
            models: Model::ALL.to_vec(),
            format: OutputFormat::default(),
        }
    }
}

// Display trait implementations

impl fmt::Display for BenchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, repeats={}, warmup={}",
            self.workload, self.runtime.repeats, self.runtime.warmup
        )
    }
}

impl fmt::Display for WorkloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tasks={}, concurrency={}, cpu_units={}, payload_size={}, timeout_ms={}",
            self.tasks, self.concurrency, self.cpu_units, self.payload_size, self.timeout_ms
        )
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suite::Cpu => write!(f, "cpu"),
            Suite::Io => write!(f, "io"),
            Suite::All => write!(f, "all"),
        }
    }
}
