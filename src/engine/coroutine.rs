//! Cooperative coroutine engine
//!
//! Coroutines are explicit state machines driven by a single-threaded loop.
//! Each [`CpuCoroutine`] runs one fixed chunk of the CPU loop per resumption
//! and then yields; the scheduler resumes every active coroutine once per pass
//! (round-robin) and refills a finished coroutine's place immediately. Exactly
//! one coroutine executes at any instant and nothing preempts it, so fairness
//! comes entirely from the chunk size.
//!
//! I/O coroutines are scheduled by readiness instead; see
//! [`io_task`](super::io_task).

use super::io_task::run_io_coroutines;
use super::window::Window;
use super::{Engine, Model, RunStats};
use crate::config::WorkloadConfig;
use crate::workload::{cpu_step, WorkloadKind};
use crate::Result;
use std::hint::black_box;
use tracing::debug;

/// Work units executed per resumption
pub const CHUNK_UNITS: u32 = 5000;

/// Result of resuming a coroutine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// The coroutine yielded and wants to be resumed again
    Yielded,
    /// The coroutine has folded its result into the checksum
    Finished,
}

/// One CPU task as a resumable state machine
#[derive(Debug, Clone)]
pub struct CpuCoroutine {
    total: u32,
    done: u32,
    acc: u32,
}

impl CpuCoroutine {
    pub fn new(total: u32) -> Self {
        Self { total, done: 0, acc: 0 }
    }

    /// Run up to `chunk` units, then suspend
    ///
    /// After the last chunk the accumulator is XOR-folded into `checksum`
    /// and `Finished` is returned. A zero-unit budget finishes on the first
    /// resumption.
    pub fn resume(&mut self, chunk: u32, checksum: &mut u32) -> Resume {
        let end = self.total.min(self.done.saturating_add(chunk));
        self.acc = black_box(cpu_step(self.acc, self.done, end));
        self.done = end;

        if self.done >= self.total {
            *checksum ^= self.acc;
            Resume::Finished
        } else {
            Resume::Yielded
        }
    }

    pub fn is_finished(&self) -> bool {
        self.done >= self.total
    }
}

/// Round-robin scheduler over a bounded active list
pub fn run_cpu_coroutines(workload: &WorkloadConfig, chunk: u32) -> RunStats {
    debug_assert!(chunk > 0, "chunk must be positive");

    let mut window = Window::new(workload.tasks, workload.concurrency);
    let mut active: Vec<CpuCoroutine> = Vec::with_capacity(workload.concurrency.min(workload.tasks));
    let mut checksum = 0u32;
    let mut passes = 0u64;

    while window.can_launch() {
        window.launch();
        active.push(CpuCoroutine::new(workload.cpu_units));
    }

    while !active.is_empty() {
        passes += 1;
        let mut i = 0;
        while i < active.len() {
            if active[i].resume(chunk, &mut checksum) == Resume::Yielded {
                i += 1;
                continue;
            }
            window.complete();
            if window.can_launch() {
                // Refill in place; the newcomer runs on the next pass
                window.launch();
                active[i] = CpuCoroutine::new(workload.cpu_units);
                i += 1;
            } else {
                // The element swapped in has not run this pass yet
                active.swap_remove(i);
            }
        }
    }

    debug_assert!(window.is_done());
    debug!("cpu coroutines finished {} tasks in {} passes", window.completed(), passes);

    RunStats {
        completed: window.completed() as u64,
        failed: 0,
        peak_in_flight: window.peak(),
        checksum: Some(checksum),
    }
}

/// Single-threaded coroutine engine
#[derive(Debug, Clone)]
pub struct CoroutineEngine {
    chunk: u32,
}

impl CoroutineEngine {
    pub fn new() -> Self {
        Self::with_chunk(CHUNK_UNITS)
    }

    /// Engine with a custom CPU chunk size (at least one unit)
    pub fn with_chunk(chunk: u32) -> Self {
        Self { chunk: chunk.max(1) }
    }
}

impl Default for CoroutineEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for CoroutineEngine {
    fn model(&self) -> Model {
        Model::Coroutines
    }

    fn run(&mut self, workload: &WorkloadConfig, kind: WorkloadKind) -> Result<RunStats> {
        match kind {
            WorkloadKind::Cpu => Ok(run_cpu_coroutines(workload, self.chunk)),
            WorkloadKind::Io { port } => run_io_coroutines(workload, port),
        }
    }
}
