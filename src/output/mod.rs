//! Report output
//!
//! Reports go to stdout; logging goes to stderr, so either format can be
//! piped on its own.
//!
//! - **Markdown** (default): banner, then each category's table as soon as
//!   the category finishes, then interpretation hints
//! - **JSON**: a single document once every category has finished

pub mod json;
pub mod markdown;

use crate::config::{BenchConfig, OutputFormat};
use crate::stats::SuiteReport;
use crate::Result;

/// Stdout writer for one benchmark invocation
#[derive(Debug, Clone)]
pub struct Reporter {
    format: OutputFormat,
    cpus: usize,
}

impl Reporter {
    pub fn new(format: OutputFormat, cpus: usize) -> Self {
        Self { format, cpus }
    }

    /// Before any benchmark runs
    pub fn begin(&self, config: &BenchConfig) {
        if self.format == OutputFormat::Markdown {
            println!("{}", markdown::render_banner(config, self.cpus));
        }
    }

    /// After one category has finished
    pub fn suite(&self, report: &SuiteReport) {
        if self.format == OutputFormat::Markdown {
            println!("{}", report.category.description());
            println!();
            println!("{}", markdown::render_table(report));
        }
    }

    /// After every category has finished
    pub fn finish(&self, config: &BenchConfig, reports: &[SuiteReport]) -> Result<()> {
        match self.format {
            OutputFormat::Markdown => {
                if !reports.is_empty() {
                    print!("{}", markdown::render_hints(reports));
                }
            }
            OutputFormat::Json => println!("{}", json::render(config, self.cpus, reports)?),
        }
        Ok(())
    }
}
