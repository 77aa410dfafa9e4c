//! Timing statistics
//!
//! Each model is timed over `repeats` measured runs. A [`ModelResult`] keeps
//! every sample plus the diagnostics of the runs, and summarizes them the way
//! the report prints them: median, fastest, slowest and run count.
//!
//! The median is the upper median (`sorted[len / 2]`), so an even number of
//! samples never produces a synthetic value that was not actually measured.
//!
//! # Example
//!
//! ```
//! use modelbench::engine::Model;
//! use modelbench::stats::ModelResult;
//! use std::time::Duration;
//!
//! let mut result = ModelResult::new(Model::Threads);
//! for ms in [30, 10, 20] {
//!     result.record(Duration::from_millis(ms), &Default::default());
//! }
//! assert_eq!(result.median(), Some(Duration::from_millis(20)));
//! assert_eq!(result.min(), Some(Duration::from_millis(10)));
//! assert_eq!(result.runs(), 3);
//! ```

use crate::engine::{Model, RunStats};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Measured runs of one model in one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub model: Model,
    /// Wall time of every measured run, in execution order
    pub samples: Vec<Duration>,
    /// Task failures summed over the measured runs
    pub failed: u64,
    /// Largest in-flight count seen in any measured run
    pub peak_in_flight: usize,
    /// Checksum of the last measured CPU run, if the engine reports one
    pub checksum: Option<u32>,
}

impl ModelResult {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            samples: Vec::new(),
            failed: 0,
            peak_in_flight: 0,
            checksum: None,
        }
    }

    /// Add one measured run
    pub fn record(&mut self, elapsed: Duration, stats: &RunStats) {
        self.samples.push(elapsed);
        self.failed += stats.failed;
        self.peak_in_flight = self.peak_in_flight.max(stats.peak_in_flight);
        if stats.checksum.is_some() {
            self.checksum = stats.checksum;
        }
    }

    pub fn runs(&self) -> usize {
        self.samples.len()
    }

    /// Upper median of the samples
    pub fn median(&self) -> Option<Duration> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        Some(sorted[sorted.len() / 2])
    }

    pub fn min(&self) -> Option<Duration> {
        self.samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<Duration> {
        self.samples.iter().max().copied()
    }
}

/// Benchmark category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Cpu,
    Io,
}

impl Category {
    /// Heading of the category's result table
    pub fn title(self) -> &'static str {
        match self {
            Category::Cpu => "CPU-bound benchmark results",
            Category::Io => "I/O-bound benchmark results",
        }
    }

    /// One-line description printed before the category runs
    pub fn description(self) -> &'static str {
        match self {
            Category::Cpu => "CPU-bound benchmark (pure compute loop)",
            Category::Io => "I/O-bound benchmark (local TCP echo)",
        }
    }
}

/// Results of every selected model for one category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub category: Category,
    pub results: Vec<ModelResult>,
}

impl SuiteReport {
    pub fn new(category: Category) -> Self {
        Self {
            category,
            results: Vec::new(),
        }
    }

    /// Model with the lowest median, if any run was recorded
    pub fn fastest(&self) -> Option<&ModelResult> {
        self.results
            .iter()
            .filter_map(|r| r.median().map(|m| (m, r)))
            .min_by_key(|(m, _)| *m)
            .map(|(_, r)| r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(model: Model, millis: &[u64]) -> ModelResult {
        let mut result = ModelResult::new(model);
        for &ms in millis {
            result.record(Duration::from_millis(ms), &RunStats::default());
        }
        result
    }

    #[test]
    fn test_upper_median_for_even_count() {
        let result = result_with(Model::Threads, &[40, 10, 30, 20]);
        assert_eq!(result.median(), Some(Duration::from_millis(30)));
        assert_eq!(result.min(), Some(Duration::from_millis(10)));
        assert_eq!(result.max(), Some(Duration::from_millis(40)));
    }

    #[test]
    fn test_single_sample() {
        let result = result_with(Model::Processes, &[7]);
        assert_eq!(result.median(), Some(Duration::from_millis(7)));
        assert_eq!(result.min(), result.max());
        assert_eq!(result.runs(), 1);
    }

    #[test]
    fn test_empty_has_no_summary() {
        let result = ModelResult::new(Model::Coroutines);
        assert_eq!(result.median(), None);
        assert_eq!(result.min(), None);
    }

    #[test]
    fn test_record_accumulates_diagnostics() {
        let mut result = ModelResult::new(Model::Coroutines);
        let first = RunStats {
            completed: 10,
            failed: 2,
            peak_in_flight: 3,
            checksum: Some(5),
        };
        let second = RunStats {
            completed: 10,
            failed: 1,
            peak_in_flight: 2,
            checksum: Some(5),
        };
        result.record(Duration::from_millis(1), &first);
        result.record(Duration::from_millis(1), &second);
        assert_eq!(result.failed, 3);
        assert_eq!(result.peak_in_flight, 3);
        assert_eq!(result.checksum, Some(5));
    }

    #[test]
    fn test_fastest_by_median() {
        let mut suite = SuiteReport::new(Category::Cpu);
        suite.results.push(result_with(Model::Threads, &[50, 60, 70]));
        suite.results.push(result_with(Model::Processes, &[90, 20, 95]));
        suite.results.push(result_with(Model::Coroutines, &[40, 45, 200]));
        assert_eq!(suite.fastest().map(|r| r.model), Some(Model::Coroutines));
    }
}
