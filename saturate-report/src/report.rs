//! Report Data Structures
//!
//! Everything here serializes to camelCase JSON. Large computed values are
//! carried as decimal strings and never as numbers.

use chrono::{DateTime, Utc};
use saturate_stats::{CoreEfficiencyMode, DerivedMetrics, ScoreSummary};
use serde::{Deserialize, Serialize};

/// Report schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Complete benchmark report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkReport {
    /// Report metadata and abort status
    pub benchmark_info: BenchmarkInfo,
    /// Machine the benchmark ran on
    pub system_info: SystemProfile,
    /// Resolved configuration
    pub configuration: ConfigSnapshot,
    /// Aggregates over completed runs
    pub aggregated_results: ScoreSummary,
    /// Completed runs in order
    pub individual_runs: Vec<RunResult>,
}

/// Report metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkInfo {
    /// Benchmark name
    pub name: String,
    /// Version of the binary that produced the report
    pub version: String,
    /// Report schema version, see [`SCHEMA_VERSION`]
    pub schema_version: u32,
    /// Wall-clock start of the sequence
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the sequence
    pub finished_at: DateTime<Utc>,
    /// Runs requested
    pub total_runs: u32,
    /// Runs that produced a `RunResult`
    pub completed_runs: u32,
    /// Whole sequence including cooldowns
    pub total_duration_ms: u64,
    /// Set when the sequence stopped early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort: Option<RunAbort>,
}

/// Machine the benchmark ran on, detected once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemProfile {
    /// Host name, or "Unknown"
    pub hostname: String,
    /// CPU brand string, or "Unknown"
    pub cpu_model: String,
    /// Logical cores; never zero
    pub core_count: usize,
    /// Installed memory; 0 when unknown
    pub total_memory_bytes: u64,
    /// Operating system name
    pub os: String,
    /// CPU architecture
    pub arch: String,
}

impl SystemProfile {
    /// Core count clamped to at least 1
    pub fn cores(&self) -> usize {
        self.core_count.max(1)
    }
}

/// Configuration a run executed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Length of each run
    pub duration_seconds: u64,
    /// Resident memory ceiling, if any
    pub max_memory_mb: Option<u64>,
    /// Runs requested
    pub run_count: u32,
    /// Workers per run
    pub core_count: usize,
    /// "thread" or "process"
    pub isolation: String,
    /// Units per report batch
    pub batch_max_units: u64,
    /// Partial batch flush interval
    pub batch_flush_interval_ms: u64,
    /// Core efficiency formula
    pub core_efficiency_mode: CoreEfficiencyMode,
}

/// Why a run sequence stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortReason {
    /// Resident memory exceeded the configured ceiling
    RamLimitExceeded,
    /// Workers for a later run could not be started
    WorkerSpawnFailed,
    /// The memory sampler for a later run could not be started
    SamplerFailed,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::RamLimitExceeded => f.write_str("RAM_LIMIT_EXCEEDED"),
            AbortReason::WorkerSpawnFailed => f.write_str("WORKER_SPAWN_FAILED"),
            AbortReason::SamplerFailed => f.write_str("SAMPLER_FAILED"),
        }
    }
}

/// Outcome of a run that ended without a `RunResult`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunAbort {
    /// Abort category
    pub reason: AbortReason,
    /// 1-based number of the aborted run
    pub run_number: u32,
    /// Human-readable detail
    pub message: String,
    /// Time into the run when it stopped
    pub elapsed_ms: u64,
    /// Sample that triggered a memory abort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReading>,
}

/// One memory sample, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReading {
    /// Resident set size of the coordinator plus worker processes
    pub rss: u64,
    /// Live heap of the coordinator process
    pub heap: u64,
    /// Resident memory of worker processes
    pub external: u64,
    /// File-backed and shared resident pages
    pub buffers: u64,
    /// Milliseconds after run start the sample was taken
    pub offset_ms: u64,
}

impl MemoryReading {
    /// Resident memory in MiB
    pub fn rss_mb(&self) -> f64 {
        self.rss as f64 / (1024.0 * 1024.0)
    }
}

/// One completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    /// 1-based position in the sequence
    pub run_number: u32,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Configuration the run executed with
    pub configuration: ConfigSnapshot,
    /// Measured elapsed time, grace period included
    pub duration_ms: u64,
    /// Units completed by all workers
    pub total_calculations: u64,
    /// `total_calculations / core_count`, rounded down
    pub average_calculations_per_core: u64,
    /// Largest value computed by any worker, as a decimal string
    pub largest_value: String,
    /// Highest workload index any worker completed
    pub highest_index: u64,
    /// Units per worker, indexed by worker id
    pub per_worker_calculations: Vec<u64>,
    /// Workers started for the run
    pub workers_spawned: usize,
    /// Workers that had not failed when the deadline passed
    pub active_workers_at_end: usize,
    /// Workers that had to be killed or detached after the grace period
    pub forced_terminations: usize,
    /// Derived throughput and score
    pub metrics: DerivedMetrics,
    /// Set when the metrics are unreliable
    pub degraded: bool,
    /// Conditions worth a look, in order of occurrence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Highest resident sample
    pub peak_memory: Option<MemoryReading>,
    /// Last sample before the sampler stopped
    pub final_memory: Option<MemoryReading>,
}
