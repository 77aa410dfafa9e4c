//! JSON report
//!
//! Carries the same numbers as the Markdown tables plus the per-model
//! diagnostics (failures, peak in-flight count, checksum) and the exact
//! configuration, stamped with the UTC time the report was produced.

use crate::config::BenchConfig;
use crate::engine::Model;
use crate::stats::{Category, ModelResult, SuiteReport};
use crate::util::time::format_seconds;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Duration with both microseconds and human-readable format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonDuration {
    pub micros: u64,
    pub human: String,
}

impl JsonDuration {
    pub fn from_duration(d: Duration) -> Self {
        Self {
            micros: d.as_micros() as u64,
            human: format_seconds(d),
        }
    }
}

/// One table row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonModelResult {
    pub model: Model,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<JsonDuration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<JsonDuration>,
    pub runs: Vec<JsonDuration>,
    pub failed: u64,
    pub peak_in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<u32>,
}

impl From<&ModelResult> for JsonModelResult {
    fn from(result: &ModelResult) -> Self {
        Self {
            model: result.model,
            median: result.median().map(JsonDuration::from_duration),
            min: result.min().map(JsonDuration::from_duration),
            max: result.max().map(JsonDuration::from_duration),
            runs: result.samples.iter().copied().map(JsonDuration::from_duration).collect(),
            failed: result.failed,
            peak_in_flight: result.peak_in_flight,
            checksum: result.checksum,
        }
    }
}

/// One benchmark category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonSuite {
    pub category: Category,
    pub title: String,
    pub results: Vec<JsonModelResult>,
}

/// Top-level document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonReport {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub pid: u32,
    pub cpus: usize,
    pub config: BenchConfig,
    pub suites: Vec<JsonSuite>,
}

impl JsonReport {
    pub fn new(config: &BenchConfig, cpus: usize, reports: &[SuiteReport]) -> Self {
        let suites = reports
            .iter()
            .map(|report| JsonSuite {
                category: report.category,
                title: report.category.title().to_string(),
                results: report.results.iter().map(JsonModelResult::from).collect(),
            })
            .collect();

        Self {
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            cpus,
            config: config.clone(),
            suites,
        }
    }
}

/// Serialize the whole run as pretty-printed JSON
pub fn render(config: &BenchConfig, cpus: usize, reports: &[SuiteReport]) -> Result<String> {
    let report = JsonReport::new(config, cpus, reports);
    serde_json::to_string_pretty(&report).context("Failed to serialize JSON report")
}
