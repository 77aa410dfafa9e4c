//! Thread engine
//!
//! A fixed pool of `concurrency` OS threads shares one atomic cursor. Each
//! worker claims the next task index with `fetch_add` until the cursor passes
//! `tasks`, then exits; the call returns after every worker has been joined.
//! Suspension happens inside the kernel (blocking socket calls), and the only
//! shared mutable state is the cursor, the checksum and the counters, all
//! plain atomics with `Ordering::Relaxed`.

use super::window::InFlightGauge;
use super::{Engine, Model, RunStats};
use crate::config::WorkloadConfig;
use crate::workload::net::{exchange_blocking, loopback, payload};
use crate::workload::{cpu_work, WorkloadKind};
use crate::Result;
use anyhow::Context;
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use tracing::debug;

/// State shared by every worker of one invocation
///
/// The cursor is hammered by every worker, so it gets its own cache line.
#[derive(Default)]
struct Shared {
    cursor: CachePadded<AtomicUsize>,
    checksum: AtomicU32,
    completed: AtomicU64,
    failed: AtomicU64,
    gauge: InFlightGauge,
}

impl Shared {
    /// Claim the next task, or `None` once all have been handed out
    #[inline]
    fn claim(&self, tasks: usize) -> Option<usize> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed);
        (index < tasks).then_some(index)
    }
}

/// OS thread pool engine
#[derive(Debug, Default)]
pub struct ThreadEngine;

impl ThreadEngine {
    pub fn new() -> Self {
        Self
    }

    fn run_pool<F>(&self, workload: &WorkloadConfig, name: &str, worker: F) -> Result<Shared>
    where
        F: Fn(&Shared) + Sync,
    {
        let shared = Shared::default();
        let shared_ref = &shared;
        let worker = &worker;

        crossbeam::scope(|scope| -> Result<()> {
            for id in 0..workload.concurrency {
                scope
                    .builder()
                    .name(format!("{}-{}", name, id))
                    .spawn(move |_| worker(shared_ref))
                    .with_context(|| format!("Failed to spawn worker thread {}", id))?;
            }
            Ok(())
        })
        .map_err(|_| anyhow::anyhow!("{} worker thread panicked", name))??;

        Ok(shared)
    }

    fn run_cpu(&self, workload: &WorkloadConfig) -> Result<RunStats> {
        let tasks = workload.tasks;
        let units = workload.cpu_units;

        let shared = self.run_pool(workload, "cpu-worker", |shared| {
            let mut local = 0u32;
            while shared.claim(tasks).is_some() {
                shared.gauge.enter();
                local ^= cpu_work(units);
                shared.gauge.exit();
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            shared.checksum.fetch_xor(local, Ordering::Relaxed);
        })?;

        Ok(RunStats {
            completed: shared.completed.load(Ordering::Relaxed),
            failed: 0,
            peak_in_flight: shared.gauge.peak(),
            checksum: Some(shared.checksum.load(Ordering::Relaxed)),
        })
    }

    fn run_io(&self, workload: &WorkloadConfig, port: u16) -> Result<RunStats> {
        let tasks = workload.tasks;
        let addr = loopback(port);
        let timeout = workload.timeout();
        let payload_size = workload.payload_size;

        let shared = self.run_pool(workload, "io-worker", |shared| {
            let sent = payload(payload_size);
            let mut received = vec![0u8; payload_size];
            while let Some(index) = shared.claim(tasks) {
                shared.gauge.enter();
                if let Err(e) = exchange_blocking(addr, &sent, &mut received, timeout) {
                    debug!("thread task {} failed: {}", index, e);
                    shared.failed.fetch_add(1, Ordering::Relaxed);
                }
                shared.gauge.exit();
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
        })?;

        Ok(RunStats {
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            peak_in_flight: shared.gauge.peak(),
            checksum: None,
        })
    }
}

impl Engine for ThreadEngine {
    fn model(&self) -> Model {
        Model::Threads
    }

    fn run(&mut self, workload: &WorkloadConfig, kind: WorkloadKind) -> Result<RunStats> {
        match kind {
            WorkloadKind::Cpu => self.run_cpu(workload),
            WorkloadKind::Io { port } => self.run_io(workload, port),
        }
    }
}
