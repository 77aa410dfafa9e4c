//! Bounded-window scheduling
//!
//! Every engine follows the same policy: keep up to `concurrency` tasks in
//! flight, and the moment one completes, launch the next until `tasks` have
//! been launched. The single-threaded engines (processes, coroutines) drive a
//! [`Window`] directly. The thread engine cannot, since its workers claim
//! tasks concurrently; it bounds in-flight work by pool size and observes it
//! with an [`InFlightGauge`].
//!
//! Invariants, checked in debug builds:
//!
//! - `in_flight() <= concurrency`
//! - `launched == completed + in_flight()`
//! - `launched <= tasks`

use std::sync::atomic::{AtomicUsize, Ordering};

/// Launch/complete bookkeeping for one engine invocation
#[derive(Debug, Clone)]
pub struct Window {
    tasks: usize,
    concurrency: usize,
    launched: usize,
    completed: usize,
    peak: usize,
}

impl Window {
    pub fn new(tasks: usize, concurrency: usize) -> Self {
        debug_assert!(concurrency > 0, "concurrency must be positive");
        Self {
            tasks,
            concurrency,
            launched: 0,
            completed: 0,
            peak: 0,
        }
    }

    /// True if a slot is free and unlaunched tasks remain
    #[inline]
    pub fn can_launch(&self) -> bool {
        self.launched < self.tasks && self.in_flight() < self.concurrency
    }

    /// Record a launch; the caller must have checked [`can_launch`](Self::can_launch)
    #[inline]
    pub fn launch(&mut self) {
        debug_assert!(self.can_launch(), "launch beyond window: {:?}", self);
        self.launched += 1;
        self.peak = self.peak.max(self.in_flight());
    }

    /// Record one completion
    #[inline]
    pub fn complete(&mut self) {
        self.complete_many(1);
    }

    /// Record `n` completions observed at once
    #[inline]
    pub fn complete_many(&mut self, n: usize) {
        debug_assert!(n <= self.in_flight(), "completing {} of {} in flight", n, self.in_flight());
        self.completed += n;
    }

    /// Number of tasks launched but not yet completed
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.launched - self.completed
    }

    /// Tasks not yet launched
    #[inline]
    pub fn remaining(&self) -> usize {
        self.tasks - self.launched
    }

    /// True once every task has been launched and completed
    #[inline]
    pub fn is_done(&self) -> bool {
        self.completed == self.tasks
    }

    pub fn launched(&self) -> usize {
        self.launched
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Largest in-flight count seen so far
    pub fn peak(&self) -> usize {
        self.peak
    }
}

/// Concurrent in-flight counter with a high-water mark
///
/// Updates use `Ordering::Relaxed`: the gauge is a diagnostic that is read
/// only after the workers have been joined.
#[derive(Debug, Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one task as started
    #[inline]
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
    }

    /// Mark one task as finished
    #[inline]
    pub fn exit(&self) {
        let prev = self.current.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "gauge underflow");
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}
