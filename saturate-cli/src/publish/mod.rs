//! Report Publishing
//!
//! A finished [`BenchmarkReport`] goes to up to three sinks, always in the
//! same order:
//!
//! 1. [`ConsoleRenderer`] (always)
//! 2. [`FileWriter`] when an output path is configured
//! 3. [`HttpPoster`] when a post URL is configured
//!
//! Every sink is attempted. A failing sink never stops the ones after it and
//! never fails the benchmark; failures are returned for the caller to print.

mod console;
mod file;
mod formatting;
mod http;

pub use console::ConsoleRenderer;
pub use file::FileWriter;
pub use formatting::{format_human_output, format_run_line};
pub use http::{DEFAULT_POST_TIMEOUT, HttpPoster};

use crate::config::BenchConfig;
use saturate_report::BenchmarkReport;
use std::path::PathBuf;
use thiserror::Error;

/// Errors a sink can report
#[derive(Debug, Error)]
pub enum PublishError {
    /// Writing the report file failed
    #[error("Failed to write {path}: {source}")]
    Io {
        /// Destination file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The report could not be rendered as JSON
    #[error("Failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The POST could not be sent or its response read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-2xx status
    #[error("{url} responded with status {status}")]
    Status {
        /// Target URL
        url: String,
        /// HTTP status code
        status: u16,
    },
}

/// A destination for the final report
pub trait ReportSink {
    /// Short name used in warnings
    fn name(&self) -> &str;

    /// Deliver the report
    fn publish(&self, report: &BenchmarkReport) -> Result<(), PublishError>;
}

/// Sinks for a resolved configuration, in publishing order
pub fn sinks_for(config: &BenchConfig) -> Vec<Box<dyn ReportSink>> {
    let mut sinks: Vec<Box<dyn ReportSink>> = vec![Box::new(ConsoleRenderer::new(config.format))];
    if let Some(path) = &config.output {
        sinks.push(Box::new(FileWriter::new(path.clone())));
    }
    if let Some(url) = &config.post_url {
        sinks.push(Box::new(HttpPoster::new(url.clone())));
    }
    sinks
}

/// Publish to every sink, returning `(sink name, error)` for each failure
pub fn publish(
    report: &BenchmarkReport,
    sinks: &[Box<dyn ReportSink + '_>],
) -> Vec<(String, PublishError)> {
    let mut failures = Vec::new();
    for sink in sinks {
        match sink.publish(report) {
            Ok(()) => tracing::debug!(sink = sink.name(), "report published"),
            Err(e) => {
                tracing::warn!(sink = sink.name(), error = %e, "report sink failed");
                failures.push((sink.name().to_string(), e));
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct Recorder<'a> {
        name: &'static str,
        fail: bool,
        calls: &'a RefCell<Vec<&'static str>>,
    }

    impl ReportSink for Recorder<'_> {
        fn name(&self) -> &str {
            self.name
        }

        fn publish(&self, _report: &BenchmarkReport) -> Result<(), PublishError> {
            self.calls.borrow_mut().push(self.name);
            if self.fail {
                Err(PublishError::Status {
                    url: "http://localhost".to_string(),
                    status: 500,
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_sink_order_follows_config() {
        let config = BenchConfig {
            output: Some("out.json".into()),
            post_url: Some("http://localhost:9/results".to_string()),
            ..BenchConfig::default()
        };
        let names: Vec<String> = sinks_for(&config)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["console", "file", "http"]);

        let console_only: Vec<String> = sinks_for(&BenchConfig::default())
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(console_only, vec!["console"]);
    }

    #[test]
    fn test_failing_sink_does_not_stop_others() {
        let calls = RefCell::new(Vec::new());
        let sinks: Vec<Box<dyn ReportSink + '_>> = vec![
            Box::new(Recorder {
                name: "first",
                fail: true,
                calls: &calls,
            }),
            Box::new(Recorder {
                name: "second",
                fail: false,
                calls: &calls,
            }),
        ];
        let report = formatting::tests::sample_report();

        let failures = publish(&report, &sinks);
        assert_eq!(*calls.borrow(), vec!["first", "second"]);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "first");
    }
}
