//! CLI argument parsing using clap

use super::{BenchConfig, OutputConfig, OutputFormat, RuntimeConfig, ServerConfig, Suite, WorkloadConfig};
use crate::engine::Model;
use clap::Parser;
use tracing::warn;

/// modelbench - threads vs processes vs coroutines on CPU and I/O workloads
///
/// Integer flags accept any value; counts below their minimum are clamped
/// (tasks, concurrency and repeats to 1; warmup, CPU units and payload size
/// to 0).
#[derive(Parser, Debug)]
#[command(name = "modelbench")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Number of tasks per benchmark run
    #[arg(long, default_value_t = 2000, allow_negative_numbers = true)]
    pub tasks: i64,

    /// Maximum tasks in flight (threads, child processes or coroutines)
    #[arg(long, default_value_t = 200, allow_negative_numbers = true)]
    pub concurrency: i64,

    /// Measured runs per model
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    pub repeats: i64,

    /// Unmeasured warmup runs per model
    #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
    pub warmup: i64,

    /// Iterations of the CPU loop per task
    #[arg(long, default_value_t = 200_000, allow_negative_numbers = true)]
    pub cpu_units: i64,

    /// Bytes sent and echoed per I/O task
    #[arg(long, default_value_t = 256, allow_negative_numbers = true)]
    pub payload_size: i64,

    /// Echo server listen backlog
    #[arg(long, default_value_t = 4096)]
    pub backlog: i32,

    /// Socket timeout (threads, processes) and task deadline (coroutines)
    #[arg(long, default_value_t = 20_000)]
    pub timeout_ms: u64,

    // === Selection ===
    /// Benchmark categories to run
    #[arg(long, value_enum, default_value = "all")]
    pub suite: Suite,

    /// Concurrency models to run, comma-separated
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = Model::ALL)]
    pub models: Vec<Model>,

    // === Output ===
    /// Report format written to stdout
    #[arg(long, value_enum, default_value = "markdown")]
    pub format: OutputFormat,

    /// Enable debug logging on stderr
    #[arg(short = 'v', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Cli {
    /// Parse CLI arguments
    ///
    /// Help and version exit 0. Usage errors exit 1, since clap's default
    /// of 2 is reserved for fatal reactor failures.
    pub fn parse_args() -> Self {
        match Self::try_parse() {
            Ok(cli) => cli,
            Err(err) if !err.use_stderr() => err.exit(),
            Err(err) => {
                let _ = err.print();
                std::process::exit(1);
            }
        }
    }

    /// Build the benchmark configuration, clamping out-of-range counts
    pub fn into_config(self) -> BenchConfig {
        let mut models = Vec::with_capacity(self.models.len());
        for model in self.models {
            if !models.contains(&model) {
                models.push(model);
            }
        }

        BenchConfig {
            workload: WorkloadConfig {
                tasks: clamp_count("tasks", self.tasks, 1),
                concurrency: clamp_count("concurrency", self.concurrency, 1),
                cpu_units: clamp_units(self.cpu_units),
                payload_size: clamp_count("payload_size", self.payload_size, 0),
                timeout_ms: self.timeout_ms,
            },
            runtime: RuntimeConfig {
                repeats: clamp_count("repeats", self.repeats, 1),
                warmup: clamp_count("warmup", self.warmup, 0),
            },
            server: ServerConfig {
                backlog: self.backlog,
            },
            output: OutputConfig {
                suite: self.suite,
                models,
                format: self.format,
            },
        }
    }
}

fn clamp_count(name: &str, value: i64, min: usize) -> usize {
    if value < min as i64 {
        warn!("{}={} is below {}, using {}", name, value, min, min);
        min
    } else {
        value as usize
    }
}

fn clamp_units(value: i64) -> u32 {
    let units = clamp_count("cpu_units", value, 0);
    u32::try_from(units).unwrap_or_else(|_| {
        warn!("cpu_units={} exceeds {}, using {}", value, u32::MAX, u32::MAX);
        u32::MAX
    })
}
