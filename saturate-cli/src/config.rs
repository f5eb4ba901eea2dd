//! Configuration loading from saturate.toml
//!
//! Saturate configuration can be specified in a `saturate.toml` (or
//! `saturate.json`) file. The file is discovered by walking up from the
//! current directory unless `--config` names one explicitly.
//!
//! Values are layered: built-in defaults, then the file, then CLI flags.
//! The result is a [`BenchConfig`], validated once and read-only afterwards.

use saturate_ipc::BatchPolicy;
use saturate_report::{ConfigSnapshot, OutputFormat};
use saturate_stats::CoreEfficiencyMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// File names looked for during discovery, in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["saturate.toml", "saturate.json"];

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("Invalid TOML in {path}: {source}")]
    Toml {
        /// Offending file
        path: PathBuf,
        /// Parser error
        source: toml::de::Error,
    },

    /// The config file is not valid JSON for this schema
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        /// Offending file
        path: PathBuf,
        /// Parser error
        source: serde_json::Error,
    },

    /// A duration string could not be parsed
    #[error("Invalid duration '{value}': {reason}")]
    Duration {
        /// The string as written
        value: String,
        /// What is wrong with it
        reason: String,
    },

    /// A value is out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// How workers are isolated from the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// One OS thread per core inside the coordinator process (default)
    #[default]
    Thread,
    /// One worker process per core, spawned from the saturate binary
    Process,
}

impl std::fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IsolationMode::Thread => f.write_str("thread"),
            IsolationMode::Process => f.write_str("process"),
        }
    }
}

impl std::str::FromStr for IsolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "thread" => Ok(IsolationMode::Thread),
            "process" => Ok(IsolationMode::Process),
            other => Err(format!("Unknown isolation mode: {other}")),
        }
    }
}

/// Saturate configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Memory sampling configuration
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Length of each run in whole seconds
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,
    /// Number of sequential runs
    #[serde(default = "default_runs")]
    pub runs: u32,
    /// Isolation mode: "thread" or "process"
    #[serde(default)]
    pub isolation: IsolationMode,
    /// Pause between runs (e.g., "2s")
    #[serde(default = "default_cooldown")]
    pub cooldown: String,
    /// How long stopped workers get to flush before they are forced down
    #[serde(default = "default_grace_period")]
    pub grace_period: String,
    /// Pin worker i to core i
    #[serde(default)]
    pub pin_workers: bool,
    /// Core efficiency formula: "balanced" or "active-workers"
    #[serde(default)]
    pub core_efficiency: CoreEfficiencyMode,
    /// Units per report batch (1 = report every unit)
    #[serde(default = "default_batch_units")]
    pub batch_units: u64,
    /// Flush a partial batch after this long (e.g., "50ms")
    #[serde(default = "default_batch_interval")]
    pub batch_interval: String,
    /// Binary to spawn for process isolation (defaults to the running executable)
    #[serde(default)]
    pub worker_binary: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_duration_seconds(),
            runs: default_runs(),
            isolation: IsolationMode::default(),
            cooldown: default_cooldown(),
            grace_period: default_grace_period(),
            pin_workers: false,
            core_efficiency: CoreEfficiencyMode::default(),
            batch_units: default_batch_units(),
            batch_interval: default_batch_interval(),
            worker_binary: None,
        }
    }
}

fn default_duration_seconds() -> u64 {
    10
}
fn default_runs() -> u32 {
    1
}
fn default_cooldown() -> String {
    "2s".to_string()
}
fn default_grace_period() -> String {
    "500ms".to_string()
}
fn default_batch_units() -> u64 {
    saturate_ipc::DEFAULT_MAX_BATCH_UNITS
}
fn default_batch_interval() -> String {
    "50ms".to_string()
}

/// Memory sampling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Abort a run once resident memory exceeds this many MB
    #[serde(default)]
    pub max_mb: Option<u64>,
    /// Sampling interval (e.g., "1s")
    #[serde(default = "default_sample_interval")]
    pub sample_interval: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_mb: None,
            sample_interval: default_sample_interval(),
        }
    }
}

fn default_sample_interval() -> String {
    "1s".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Console format: "human" or "json"
    #[serde(default = "default_format")]
    pub format: String,
    /// Write the JSON report to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// POST the JSON report to this URL
    #[serde(default)]
    pub post_url: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            file: None,
            post_url: None,
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}

/// Values given on the command line; `Some` wins over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// `--duration`
    pub duration_seconds: Option<u64>,
    /// `--max-memory`
    pub max_memory_mb: Option<u64>,
    /// `--runs`
    pub runs: Option<u32>,
    /// `--output`
    pub output: Option<PathBuf>,
    /// `--post`
    pub post_url: Option<String>,
    /// `--format`
    pub format: Option<OutputFormat>,
    /// `--isolation`
    pub isolation: Option<IsolationMode>,
    /// `--cooldown`
    pub cooldown: Option<Duration>,
    /// `--pin`
    pub pin_workers: Option<bool>,
}

impl FileConfig {
    /// Load configuration from a file; `.json` is parsed as JSON, anything else as TOML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        } else {
            toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Find a config file by walking up from `start`
    pub fn discover_from(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            for name in CONFIG_FILE_NAMES {
                let config_path = dir.join(name);
                if config_path.is_file() {
                    return Some(config_path);
                }
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Try to discover and load configuration by walking up from current directory.
    ///
    /// No file found is not an error; a file that fails to parse is.
    pub fn discover() -> Result<Option<(PathBuf, Self)>, ConfigError> {
        let Ok(cwd) = std::env::current_dir() else {
            return Ok(None);
        };
        match Self::discover_from(&cwd) {
            Some(path) => {
                let config = Self::load(&path)?;
                Ok(Some((path, config)))
            }
            None => Ok(None),
        }
    }

    /// Layer CLI overrides on top of this file and validate the result
    pub fn resolve(&self, overrides: &ConfigOverrides) -> Result<BenchConfig, ConfigError> {
        let format = match overrides.format {
            Some(format) => format,
            None => self
                .output
                .format
                .parse()
                .map_err(|reason| ConfigError::Invalid {
                    field: "output.format",
                    reason,
                })?,
        };

        let cooldown = match overrides.cooldown {
            Some(cooldown) => cooldown,
            None => parse_duration(&self.runner.cooldown)?,
        };

        let config = BenchConfig {
            duration_seconds: overrides
                .duration_seconds
                .unwrap_or(self.runner.duration_seconds),
            max_memory_mb: overrides.max_memory_mb.or(self.memory.max_mb),
            run_count: overrides.runs.unwrap_or(self.runner.runs),
            output: overrides.output.clone().or_else(|| self.output.file.clone()),
            post_url: overrides
                .post_url
                .clone()
                .or_else(|| self.output.post_url.clone()),
            format,
            isolation: overrides.isolation.unwrap_or(self.runner.isolation),
            cooldown,
            sample_interval: parse_duration(&self.memory.sample_interval)?,
            grace_period: parse_duration(&self.runner.grace_period)?,
            batch: BatchPolicy {
                max_units: self.runner.batch_units,
                flush_interval: parse_duration(&self.runner.batch_interval)?,
            },
            pin_workers: overrides.pin_workers.unwrap_or(self.runner.pin_workers),
            core_efficiency: self.runner.core_efficiency,
            worker_binary: self.runner.worker_binary.clone(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Saturate Configuration

[runner]
# Length of each run in whole seconds
duration_seconds = 10
# Number of sequential runs
runs = 1
# Isolation mode: "thread" or "process"
isolation = "thread"
# Pause between runs (not after the last)
cooldown = "2s"
# Time stopped workers get to flush before being forced down
grace_period = "500ms"
# Pin worker i to core i
pin_workers = false
# Core efficiency formula: "balanced" or "active-workers"
core_efficiency = "balanced"
# Units per report batch (1 = report every unit)
batch_units = 256
# Flush a partial batch after this long
batch_interval = "50ms"
# Binary to spawn for process isolation (uncomment to enable)
# worker_binary = "/usr/local/bin/saturate"

[memory]
# Abort a run once resident memory exceeds this many MB (uncomment to enable)
# max_mb = 2048
# Sampling interval
sample_interval = "1s"

[output]
# Console format: human or json
format = "human"
# Write the JSON report to a file (uncomment to enable)
# file = "saturate-results.json"
# POST the JSON report to a URL (uncomment to enable)
# post_url = "https://example.com/results"
"#
        .to_string()
    }
}

/// Resolved benchmark configuration
#[derive(Debug, Clone, PartialEq)]
pub struct BenchConfig {
    /// Length of each run in whole seconds (> 0)
    pub duration_seconds: u64,
    /// Memory ceiling in MB
    pub max_memory_mb: Option<u64>,
    /// Number of sequential runs (>= 1)
    pub run_count: u32,
    /// JSON report destination
    pub output: Option<PathBuf>,
    /// JSON report POST target
    pub post_url: Option<String>,
    /// Console format
    pub format: OutputFormat,
    /// Worker isolation
    pub isolation: IsolationMode,
    /// Pause between runs
    pub cooldown: Duration,
    /// Memory sampling interval
    pub sample_interval: Duration,
    /// Time stopped workers get to flush before being forced down
    pub grace_period: Duration,
    /// Report batching
    pub batch: BatchPolicy,
    /// Pin worker i to core i
    pub pin_workers: bool,
    /// Core efficiency formula
    pub core_efficiency: CoreEfficiencyMode,
    /// Binary spawned for process isolation
    pub worker_binary: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            duration_seconds: default_duration_seconds(),
            max_memory_mb: None,
            run_count: default_runs(),
            output: None,
            post_url: None,
            format: OutputFormat::Human,
            isolation: IsolationMode::default(),
            cooldown: Duration::from_secs(2),
            sample_interval: saturate_core::DEFAULT_SAMPLE_INTERVAL,
            grace_period: Duration::from_millis(500),
            batch: BatchPolicy::default(),
            pin_workers: false,
            core_efficiency: CoreEfficiencyMode::default(),
            worker_binary: None,
        }
    }
}

impl BenchConfig {
    /// Run length
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    /// Memory ceiling in bytes
    pub fn memory_limit_bytes(&self) -> Option<u64> {
        self.max_memory_mb.map(|mb| mb.saturating_mul(1024 * 1024))
    }

    /// Check the invariants every consumer relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "duration",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.run_count == 0 {
            return Err(ConfigError::Invalid {
                field: "runs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_memory_mb == Some(0) {
            return Err(ConfigError::Invalid {
                field: "max-memory",
                reason: "must be a positive number of MB".to_string(),
            });
        }
        if self.batch.max_units == 0 {
            return Err(ConfigError::Invalid {
                field: "runner.batch_units",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sample_interval.is_zero() {
            return Err(ConfigError::Invalid {
                field: "memory.sample_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if let Some(url) = &self.post_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid {
                    field: "post",
                    reason: format!("'{url}' is not an http(s) URL"),
                });
            }
        }
        Ok(())
    }

    /// The per-run configuration recorded in results
    pub fn snapshot(&self, core_count: usize) -> ConfigSnapshot {
        ConfigSnapshot {
            duration_seconds: self.duration_seconds,
            max_memory_mb: self.max_memory_mb,
            run_count: self.run_count,
            core_count,
            isolation: self.isolation.to_string(),
            batch_max_units: self.batch.max_units,
            batch_flush_interval_ms: self.batch.flush_interval.as_millis() as u64,
            core_efficiency_mode: self.core_efficiency,
        }
    }
}

/// Parse duration string (e.g., "3s", "500ms", "2m")
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let invalid = |reason: String| ConfigError::Duration {
        value: s.to_string(),
        reason,
    };

    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty duration string".to_string()));
    }

    // Find where the number ends and unit begins
    let (num_part, unit_part) = trimmed
        .char_indices()
        .find(|(_, c)| c.is_alphabetic())
        .map(|(i, _)| trimmed.split_at(i))
        .unwrap_or((trimmed, "s"));

    let value: f64 = num_part
        .trim()
        .parse()
        .map_err(|_| invalid(format!("invalid number '{num_part}'")))?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid("must be a non-negative number".to_string()));
    }

    let multiplier: u64 = match unit_part.to_lowercase().as_str() {
        "ns" => 1,
        "us" | "µs" => 1_000,
        "ms" => 1_000_000,
        "s" | "" => 1_000_000_000,
        "m" | "min" => 60_000_000_000,
        other => return Err(invalid(format!("unknown unit '{other}'"))),
    };

    Ok(Duration::from_nanos((value * multiplier as f64) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert_eq!(config.runner.duration_seconds, 10);
        assert_eq!(config.runner.runs, 1);
        assert_eq!(config.runner.cooldown, "2s");
        assert_eq!(config.runner.isolation, IsolationMode::Thread);
        assert!(config.memory.max_mb.is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("100us").unwrap(), Duration::from_micros(100));
        assert_eq!(parse_duration("1000ns").unwrap(), Duration::from_nanos(1000));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("4").unwrap(), Duration::from_secs(4));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("3 fortnights").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            duration_seconds = 3
            runs = 4
            isolation = "process"

            [memory]
            max_mb = 512
        "#;

        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.duration_seconds, 3);
        assert_eq!(config.runner.runs, 4);
        assert_eq!(config.runner.isolation, IsolationMode::Process);
        assert_eq!(config.memory.max_mb, Some(512));
        // Defaults should still apply
        assert_eq!(config.output.format, "human");
        assert_eq!(config.runner.grace_period, "500ms");
    }

    #[test]
    fn test_default_toml_parses() {
        let config: FileConfig = toml::from_str(&FileConfig::default_toml()).unwrap();
        let resolved = config.resolve(&ConfigOverrides::default()).unwrap();
        assert_eq!(resolved, BenchConfig::default());
    }

    #[test]
    fn test_cli_overrides_win() {
        let file: FileConfig = toml::from_str(
            r#"
            [runner]
            duration_seconds = 30
            runs = 5

            [memory]
            max_mb = 1024

            [output]
            post_url = "https://results.example/submit"
        "#,
        )
        .unwrap();

        let resolved = file
            .resolve(&ConfigOverrides {
                duration_seconds: Some(2),
                max_memory_mb: Some(64),
                isolation: Some(IsolationMode::Process),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(resolved.duration_seconds, 2);
        assert_eq!(resolved.run_count, 5);
        assert_eq!(resolved.max_memory_mb, Some(64));
        assert_eq!(resolved.memory_limit_bytes(), Some(64 * 1024 * 1024));
        assert_eq!(resolved.isolation, IsolationMode::Process);
        assert_eq!(
            resolved.post_url.as_deref(),
            Some("https://results.example/submit")
        );
    }

    #[test]
    fn test_validation_rejects_degenerate_values() {
        let file = FileConfig::default();
        for overrides in [
            ConfigOverrides {
                duration_seconds: Some(0),
                ..Default::default()
            },
            ConfigOverrides {
                runs: Some(0),
                ..Default::default()
            },
            ConfigOverrides {
                max_memory_mb: Some(0),
                ..Default::default()
            },
            ConfigOverrides {
                post_url: Some("ftp://nope".to_string()),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                file.resolve(&overrides),
                Err(ConfigError::Invalid { .. })
            ));
        }
    }

    #[test]
    fn test_load_json_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let path = dir.path().join("saturate.json");
        std::fs::write(
            &path,
            r#"{ "runner": { "duration_seconds": 7 }, "output": { "format": "json" } }"#,
        )
        .unwrap();

        assert_eq!(FileConfig::discover_from(&nested), Some(path.clone()));

        let config = FileConfig::load(&path).unwrap();
        assert_eq!(config.runner.duration_seconds, 7);
        let resolved = config.resolve(&ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.format, OutputFormat::Json);
    }

    #[test]
    fn test_load_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saturate.toml");
        std::fs::write(&path, "[runner\nduration_seconds = ").unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn test_snapshot() {
        let config = BenchConfig {
            duration_seconds: 2,
            ..Default::default()
        };
        let snapshot = config.snapshot(8);
        assert_eq!(snapshot.duration_seconds, 2);
        assert_eq!(snapshot.core_count, 8);
        assert_eq!(snapshot.isolation, "thread");
        assert_eq!(snapshot.batch_flush_interval_ms, 50);
    }
}
