#![warn(missing_docs)]
//! # Saturate
//!
//! Multi-core CPU saturation benchmark: load every core with arbitrary
//! precision arithmetic for a fixed time, watch memory, derive a comparable
//! score.
//!
//! Saturate provides:
//! - **Full Saturation**: one worker per logical core, as threads or as isolated processes
//! - **Exact Workload**: Fibonacci numbers with `num-bigint`, reported as decimal strings
//! - **Memory Guard**: periodic sampling with an optional hard ceiling that aborts the run
//! - **Cheap Reporting**: batched worker reports over channels or rkyv-framed pipes
//! - **Comparable Scores**: throughput, core efficiency and memory efficiency in one number
//! - **Publishing**: console, JSON file and HTTP POST sinks
//!
//! ## Quick Start
//!
//! ```ignore
//! use saturate::{BenchConfig, NoopObserver, Orchestrator, detect_system_profile};
//!
//! let config = BenchConfig {
//!     duration_seconds: 5,
//!     run_count: 3,
//!     ..BenchConfig::default()
//! };
//! let report = Orchestrator::new(config, detect_system_profile()).run(&mut NoopObserver)?;
//! println!("best score: {:?}", report.aggregated_results.best_score);
//! ```

// Re-export core types
pub use saturate_core::{
    Deadline, MemorySample, MemorySampler, MemoryStats, SamplerConfig, TrackingAllocator,
    WorkerMain, Workload, available_cores, fibonacci, heap_in_use,
};

// Re-export wire types
pub use saturate_ipc::{BatchPolicy, ReportBatch, cmp_decimal, is_decimal};

// Re-export stats
pub use saturate_stats::{
    CoreEfficiencyMode, DerivedMetrics, RunTotals, ScoreSummary, derive_metrics,
    summarize_scores,
};

// Re-export report types
pub use saturate_report::{
    AbortReason, BenchmarkReport, MemoryReading, OutputFormat, RunAbort, RunResult,
    SystemProfile, generate_json_report, parse_json_report,
};

// Re-export the engine
pub use saturate_cli::{
    BenchConfig, ConsoleRenderer, FileWriter, HttpPoster, IsolationMode, NoopObserver,
    Orchestrator, OrchestratorError, PublishError, ReportSink, RunCoordinator, RunObserver,
    RunOutcome, detect_system_profile, publish, sinks_for,
};

/// Run the Saturate CLI.
///
/// Call this from a binary's `main()`:
/// ```ignore
/// fn main() -> anyhow::Result<()> {
///     saturate::run()
/// }
/// ```
pub use saturate_cli::run;
