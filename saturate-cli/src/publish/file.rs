//! File sink

use super::{PublishError, ReportSink};
use saturate_report::{BenchmarkReport, generate_json_report};
use std::path::{Path, PathBuf};

/// Writes the JSON report to a file, creating parent directories
#[derive(Debug, Clone)]
pub struct FileWriter {
    path: PathBuf,
}

impl FileWriter {
    /// File sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportSink for FileWriter {
    fn name(&self) -> &str {
        "file"
    }

    fn publish(&self, report: &BenchmarkReport) -> Result<(), PublishError> {
        let json = generate_json_report(report)?;
        let io_error = |source| PublishError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_error)?;
        }
        std::fs::write(&self.path, json).map_err(io_error)?;
        tracing::info!(path = %self.path.display(), "report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::formatting::tests::sample_report;
    use saturate_report::parse_json_report;

    #[test]
    fn test_writes_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.json");
        let report = sample_report();

        FileWriter::new(&path).publish(&report).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(parse_json_report(&written).unwrap(), report);
    }

    #[test]
    fn test_unwritable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = FileWriter::new(blocker.join("report.json"))
            .publish(&sample_report())
            .unwrap_err();
        assert!(matches!(err, PublishError::Io { .. }));
    }
}
