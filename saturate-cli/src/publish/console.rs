//! Console sink

use super::{PublishError, ReportSink, format_human_output};
use saturate_report::{BenchmarkReport, OutputFormat, generate_json_report};
use std::io::Write;

/// Prints the report to stdout in the configured format
#[derive(Debug, Clone, Copy)]
pub struct ConsoleRenderer {
    format: OutputFormat,
}

impl ConsoleRenderer {
    /// Console sink rendering in `format`
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render without printing
    pub fn render(&self, report: &BenchmarkReport) -> Result<String, PublishError> {
        match self.format {
            OutputFormat::Human => Ok(format_human_output(report)),
            OutputFormat::Json => Ok(generate_json_report(report)?),
        }
    }
}

impl ReportSink for ConsoleRenderer {
    fn name(&self) -> &str {
        "console"
    }

    fn publish(&self, report: &BenchmarkReport) -> Result<(), PublishError> {
        let rendered = self.render(report)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", rendered)
            .and_then(|()| stdout.flush())
            .map_err(|source| PublishError::Io {
                path: "<stdout>".into(),
                source,
            })
    }
}
