//! Benchmark harness
//!
//! Runs every selected model over the same workload descriptor, `warmup`
//! unmeasured times and then `repeats` measured times, timing each engine
//! invocation end to end. The CPU category runs first; the echo server is
//! only started for the I/O category.

use crate::config::{BenchConfig, RuntimeConfig, WorkloadConfig};
use crate::engine::{create_engine, Engine, RunStats};
use crate::server::EchoServer;
use crate::stats::{Category, ModelResult, SuiteReport};
use crate::util::time::{calculate_rate, format_rate, format_seconds, Timestamp};
use crate::workload::{expected_checksum, WorkloadKind};
use crate::Result;
use anyhow::Context;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between starting the echo server and the first I/O run
const SERVER_SETTLE: Duration = Duration::from_millis(100);

/// Time one engine over warmup and measured runs
pub fn run_repeated(
    engine: &mut dyn Engine,
    workload: &WorkloadConfig,
    kind: WorkloadKind,
    runtime: &RuntimeConfig,
) -> Result<ModelResult> {
    let model = engine.model();

    for i in 0..runtime.warmup {
        let stats = engine
            .run(workload, kind)
            .with_context(|| format!("{} warmup run {} failed", model, i + 1))?;
        debug!("{} warmup {}/{}: {} failed", model, i + 1, runtime.warmup, stats.failed);
    }

    let mut result = ModelResult::new(model);
    for i in 0..runtime.repeats {
        let start = Timestamp::now();
        let stats = engine
            .run(workload, kind)
            .with_context(|| format!("{} run {} failed", model, i + 1))?;
        let elapsed = start.elapsed();

        debug!(
            "{} run {}/{}: {} ({} tasks/s), {} failed, peak in flight {}",
            model,
            i + 1,
            runtime.repeats,
            format_seconds(elapsed),
            format_rate(calculate_rate(stats.completed, elapsed)),
            stats.failed,
            stats.peak_in_flight
        );
        check_run(&result, workload, kind, &stats);
        result.record(elapsed, &stats);
    }

    Ok(result)
}

/// Warn about runs that did not do what they claim
fn check_run(result: &ModelResult, workload: &WorkloadConfig, kind: WorkloadKind, stats: &RunStats) {
    let model = result.model;
    if stats.completed != workload.tasks as u64 {
        warn!("{} completed {} of {} tasks", model, stats.completed, workload.tasks);
    }
    if stats.peak_in_flight > workload.concurrency {
        warn!(
            "{} had {} tasks in flight, above concurrency {}",
            model, stats.peak_in_flight, workload.concurrency
        );
    }
    if let (WorkloadKind::Cpu, Some(checksum)) = (kind, stats.checksum) {
        let expected = expected_checksum(workload.tasks, workload.cpu_units);
        if checksum != expected {
            warn!("{} checksum {:#010x}, expected {:#010x}", model, checksum, expected);
        }
    }
}

/// Run every selected model for one category
pub fn run_suite(config: &BenchConfig, category: Category, kind: WorkloadKind) -> Result<SuiteReport> {
    info!("{}", category.description());

    let mut report = SuiteReport::new(category);
    for &model in &config.output.models {
        info!("timing {} ({} warmup, {} measured)", model, config.runtime.warmup, config.runtime.repeats);
        let mut engine = create_engine(model);
        let result = run_repeated(engine.as_mut(), &config.workload, kind, &config.runtime)?;
        if result.failed > 0 {
            warn!("{}: {} task(s) failed across measured runs", model, result.failed);
        }
        report.results.push(result);
    }
    Ok(report)
}

/// Run the selected categories, handing each report to `on_suite` as it completes
pub fn run<F>(config: &BenchConfig, mut on_suite: F) -> Result<Vec<SuiteReport>>
where
    F: FnMut(&SuiteReport),
{
    let mut reports = Vec::new();

    if config.output.suite.includes_cpu() {
        let report = run_suite(config, Category::Cpu, WorkloadKind::Cpu)?;
        on_suite(&report);
        reports.push(report);
    }

    if config.output.suite.includes_io() {
        let server = EchoServer::start(config.server.backlog).context("Failed to start echo server")?;
        thread::sleep(SERVER_SETTLE);

        let report = run_suite(config, Category::Io, WorkloadKind::Io { port: server.port() })?;
        server.stop();
        on_suite(&report);
        reports.push(report);
    }

    Ok(reports)
}
