//! HTTP sink

use super::{PublishError, ReportSink};
use saturate_report::BenchmarkReport;
use std::time::Duration;

/// Timeout for the single results POST
pub const DEFAULT_POST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs the JSON report to a URL
#[derive(Debug, Clone)]
pub struct HttpPoster {
    url: String,
    timeout: Duration,
}

impl HttpPoster {
    /// HTTP sink posting to `url` with [`DEFAULT_POST_TIMEOUT`]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: DEFAULT_POST_TIMEOUT,
        }
    }

    /// Override the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ReportSink for HttpPoster {
    fn name(&self) -> &str {
        "http"
    }

    fn publish(&self, report: &BenchmarkReport) -> Result<(), PublishError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("saturate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let response = client.post(&self.url).json(report).send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        tracing::info!(url = %self.url, status = status.as_u16(), "report posted");
        Ok(())
    }
}
