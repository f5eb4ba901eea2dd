#![warn(missing_docs)]
//! Saturate Report - Result Data Model
//!
//! The record a benchmark produces and the formats it is emitted in:
//! - JSON (machine-readable, camelCase, large values as decimal strings)
//! - Human-readable terminal output (rendered by the CLI)

mod json;
mod report;

pub use json::{generate_json_report, parse_json_report};
pub use report::{
    AbortReason, BenchmarkInfo, BenchmarkReport, ConfigSnapshot, MemoryReading, RunAbort,
    RunResult, SCHEMA_VERSION, SystemProfile,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON with full schema
    Json,
    /// Human-readable terminal output
    #[default]
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
