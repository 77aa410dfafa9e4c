//! Markdown report
//!
//! One section per benchmark category: a `###` heading and a table with a
//! row per model, times as three-decimal seconds.

use crate::config::BenchConfig;
use crate::stats::{Category, ModelResult, SuiteReport};
use crate::util::time::format_seconds;
use std::fmt::Write;

const TABLE_HEADER: &str = "| Model | Median | Min | Max | Runs |";
const TABLE_RULE: &str = "|------:|-------:|----:|----:|-----:|";

/// Environment banner printed before any benchmark runs
pub fn render_banner(config: &BenchConfig, cpus: usize) -> String {
    format!(
        "modelbench v{} | PID: {} | CPU cores: {}\nConfig: tasks={}, concurrency={}, repeats={}\n",
        env!("CARGO_PKG_VERSION"),
        std::process::id(),
        cpus,
        config.workload.tasks,
        config.workload.concurrency,
        config.runtime.repeats
    )
}

fn cell(value: Option<std::time::Duration>) -> String {
    value.map(format_seconds).unwrap_or_else(|| "-".to_string())
}

fn render_row(out: &mut String, result: &ModelResult) {
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} |",
        result.model,
        cell(result.median()),
        cell(result.min()),
        cell(result.max()),
        result.runs()
    );
}

/// Heading and table for one category
pub fn render_table(report: &SuiteReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "### {}\n", report.category.title());
    let _ = writeln!(out, "{}", TABLE_HEADER);
    let _ = writeln!(out, "{}", TABLE_RULE);
    for result in &report.results {
        render_row(&mut out, result);
    }
    out
}

/// Interpretation hints for the categories that ran
pub fn render_hints(reports: &[SuiteReport]) -> String {
    let mut out = String::from("Interpretation hints:\n");
    for report in reports {
        let hint = match report.category {
            Category::Cpu => {
                "- CPU-bound: threads and processes spread work across cores; \
                 coroutines run on one core and only interleave."
            }
            Category::Io => {
                "- I/O-bound: coroutines and threads usually perform well; \
                 processes pay for a fork per task."
            }
        };
        let _ = writeln!(out, "{}", hint);
        if let Some(fastest) = report.fastest() {
            let _ = writeln!(out, "  Fastest median: {}", fastest.model);
        }
    }
    out
}
