//! Workload primitives
//!
//! Two workload classes are benchmarked:
//!
//! - **CPU**: a linear-congruential accumulator loop. The loop is expressed
//!   over index ranges so a cooperative task can run it in chunks and still
//!   produce exactly the value a single uninterrupted call would.
//! - **I/O**: one loopback TCP exchange (connect, send payload, read the echo,
//!   close). See [`net`].

pub mod net;

use serde::{Deserialize, Serialize};
use std::fmt;

const LCG_MUL: u32 = 1_664_525;
const LCG_INC: u32 = 1_013_904_223;

/// Workload class of one engine invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkloadKind {
    /// Pure computation, `cpu_units` iterations per task
    Cpu,
    /// One echo exchange per task against `127.0.0.1:port`
    Io { port: u16 },
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Cpu => write!(f, "cpu"),
            WorkloadKind::Io { port } => write!(f, "io(port={})", port),
        }
    }
}

/// Advance the accumulator over iterations `start..end`
///
/// `cpu_step(cpu_step(0, 0, k), k, n) == cpu_step(0, 0, n)` for any split
/// point `k`, which is what lets the coroutine engine chunk the work.
#[inline]
pub fn cpu_step(mut acc: u32, start: u32, end: u32) -> u32 {
    for i in start..end {
        acc = acc
            .wrapping_mul(LCG_MUL)
            .wrapping_add(LCG_INC)
            .wrapping_add(i);
    }
    acc
}

/// Run a whole CPU task and return its accumulator
#[inline]
pub fn cpu_work(units: u32) -> u32 {
    std::hint::black_box(cpu_step(0, 0, units))
}

/// Checksum every in-process engine should report for a CPU run
///
/// Each task contributes `cpu_work(units)`; contributions are XOR-combined,
/// so the result depends only on the task count and never on ordering.
pub fn expected_checksum(tasks: usize, units: u32) -> u32 {
    if tasks % 2 == 0 {
        0
    } else {
        cpu_step(0, 0, units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_step_first_iterations() {
        assert_eq!(cpu_step(0, 0, 0), 0);
        assert_eq!(cpu_step(0, 0, 1), LCG_INC);
        let second = LCG_INC.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC).wrapping_add(1);
        assert_eq!(cpu_step(0, 0, 2), second);
    }

    #[test]
    fn test_chunked_matches_whole() {
        let whole = cpu_work(200_000);
        for chunk in [1u32, 7, 5000, 199_999, 200_000, 300_000] {
            let mut acc = 0;
            let mut done = 0;
            while done < 200_000 {
                let end = (done + chunk).min(200_000);
                acc = cpu_step(acc, done, end);
                done = end;
            }
            assert_eq!(acc, whole, "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_expected_checksum_folds_by_parity() {
        let single = cpu_work(1000);
        assert_eq!(expected_checksum(1, 1000), single);
        assert_eq!(expected_checksum(2, 1000), 0);
        assert_eq!(expected_checksum(7, 1000), single);
        let folded = (0..7).fold(0u32, |acc, _| acc ^ cpu_work(1000));
        assert_eq!(folded, expected_checksum(7, 1000));
    }
}
