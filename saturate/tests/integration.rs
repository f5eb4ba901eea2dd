//! Integration tests for Saturate
//!
//! These tests verify the end-to-end behavior of the benchmark engine: whole
//! run sequences, memory aborts, worker failures and report publishing.

use num_bigint::BigUint;
use saturate::{
    AbortReason, BenchConfig, BenchmarkReport, FileWriter, IsolationMode, NoopObserver,
    Orchestrator, PublishError, ReportSink, RunAbort, RunCoordinator, RunObserver, RunOutcome,
    RunResult, SystemProfile, fibonacci, is_decimal, parse_json_report, publish,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

fn profile(cores: usize) -> SystemProfile {
    SystemProfile {
        hostname: "integration-host".to_string(),
        cpu_model: "Integration CPU".to_string(),
        core_count: cores,
        total_memory_bytes: 16 * 1024 * 1024 * 1024,
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
    }
}

fn quick_config() -> BenchConfig {
    BenchConfig {
        duration_seconds: 1,
        cooldown: Duration::from_millis(20),
        sample_interval: Duration::from_millis(100),
        ..BenchConfig::default()
    }
}

#[derive(Default)]
struct Counting {
    starts: u32,
    completed: Vec<u32>,
    aborted: Vec<RunAbort>,
    cooldowns: u32,
    progress_ticks: u32,
    worker_failures: Vec<u32>,
}

impl RunObserver for Counting {
    fn on_run_start(&mut self, _run_number: u32, _total_runs: u32, _cores: usize) {
        self.starts += 1;
    }

    fn on_progress(&mut self, _run: u32, _elapsed: Duration, _duration: Duration, _units: u64) {
        self.progress_ticks += 1;
    }

    fn on_worker_failed(&mut self, _run_number: u32, worker_id: u32, _message: &str) {
        self.worker_failures.push(worker_id);
    }

    fn on_run_complete(&mut self, result: &RunResult) {
        self.completed.push(result.run_number);
    }

    fn on_run_aborted(&mut self, abort: &RunAbort) {
        self.aborted.push(abort.clone());
    }

    fn on_cooldown(&mut self, _after_run: u32, _cooldown: Duration) {
        self.cooldowns += 1;
    }
}

/// Panics on the first worker to reach index 5; every other worker is unaffected
static TRIPPED: AtomicBool = AtomicBool::new(false);

fn fails_once(index: u64) -> BigUint {
    if index == 5
        && TRIPPED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    {
        panic!("simulated worker fault");
    }
    fibonacci(index)
}

#[test]
fn test_single_run_bounds() {
    let config = quick_config();
    let profile = profile(2);
    let mut observer = Counting::default();

    let outcome = RunCoordinator::new(&config, &profile, 1)
        .run(&mut observer)
        .unwrap();
    let RunOutcome::Completed(result) = outcome else {
        panic!("expected a completed run");
    };

    // Overrun is bounded by the grace period plus worker join and sampler stop
    let limit_ms = 1000 + config.grace_period.as_millis() as u64 + 250;
    assert!(result.duration_ms >= 1000);
    assert!(
        result.duration_ms <= limit_ms,
        "run took {} ms, limit {} ms",
        result.duration_ms,
        limit_ms
    );
    assert_eq!(result.forced_terminations, 0);
    assert!(result.total_calculations > 0);
    assert_eq!(
        result.average_calculations_per_core,
        result.total_calculations / 2
    );
    assert_eq!(result.active_workers_at_end, 2);
    assert!(observer.progress_ticks > 0);
    assert!(result.metrics.overall_score.is_some());
    assert!(result.final_memory.is_some());
}

#[test]
fn test_three_runs_two_cooldowns() {
    let config = BenchConfig {
        run_count: 3,
        ..quick_config()
    };
    let mut observer = Counting::default();
    let report = Orchestrator::new(config, profile(1))
        .run(&mut observer)
        .unwrap();

    assert_eq!(report.individual_runs.len(), 3);
    assert_eq!(observer.starts, 3);
    assert_eq!(observer.completed, vec![1, 2, 3]);
    assert_eq!(observer.cooldowns, 2);
    assert_eq!(report.benchmark_info.total_runs, 3);
    assert_eq!(report.benchmark_info.completed_runs, 3);

    let summary = &report.aggregated_results;
    assert_eq!(summary.completed_runs, 3);
    let best = summary.best_score.unwrap();
    let worst = summary.worst_score.unwrap();
    assert!(best >= worst);
    assert_eq!(summary.score_variance, Some(best - worst));
}

#[test]
fn test_memory_limit_aborts_sequence() {
    let config = BenchConfig {
        duration_seconds: 30,
        run_count: 3,
        max_memory_mb: Some(1),
        ..quick_config()
    };
    let mut observer = Counting::default();
    let report = Orchestrator::new(config, profile(2))
        .run(&mut observer)
        .unwrap();

    assert!(report.individual_runs.is_empty());
    assert_eq!(observer.starts, 1);
    assert_eq!(observer.cooldowns, 0);
    assert_eq!(observer.aborted.len(), 1);

    let abort = report.benchmark_info.abort.as_ref().unwrap();
    assert_eq!(abort.reason, AbortReason::RamLimitExceeded);
    assert_eq!(abort.run_number, 1);
    assert!(abort.elapsed_ms < 30_000);

    assert_eq!(report.aggregated_results.completed_runs, 0);
    assert_eq!(report.aggregated_results.average_score, None);
}

#[test]
fn test_worker_failure_degrades_run() {
    let config = quick_config();
    let mut observer = Counting::default();
    let report = Orchestrator::new(config, profile(2))
        .with_workload(fails_once)
        .run(&mut observer)
        .unwrap();

    let run = &report.individual_runs[0];
    assert_eq!(observer.worker_failures.len(), 1);
    assert_eq!(run.workers_spawned, 2);
    assert_eq!(run.active_workers_at_end, 1);
    assert!(run.degraded);
    assert!(run.warnings.iter().any(|w| w.contains("1 of 2 workers failed")));
    assert!(run.total_calculations > 0);
}

#[test]
fn test_json_report_roundtrip_preserves_large_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results").join("report.json");

    let report = Orchestrator::new(quick_config(), profile(1))
        .run(&mut NoopObserver)
        .unwrap();
    FileWriter::new(&path).publish(&report).unwrap();

    let json = std::fs::read_to_string(&path).unwrap();
    let parsed = parse_json_report(&json).unwrap();
    assert_eq!(parsed, report);

    let largest = &parsed.individual_runs[0].largest_value;
    assert!(is_decimal(largest));
    // One second of Fibonacci runs far past 2^53
    assert!(largest.len() > 16);

    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    for key in [
        "benchmarkInfo",
        "systemInfo",
        "configuration",
        "aggregatedResults",
        "individualRuns",
    ] {
        assert!(value.get(key).is_some(), "missing {key}");
    }
    let run = &value["individualRuns"][0];
    assert!(run["largestValue"].is_string());
    assert!(run["peakMemory"]["rss"].is_u64());
    assert!(run["finalMemory"]["buffers"].is_u64());
}

struct Rejecting;

impl ReportSink for Rejecting {
    fn name(&self) -> &str {
        "rejecting"
    }

    fn publish(&self, _report: &BenchmarkReport) -> Result<(), PublishError> {
        Err(PublishError::Status {
            url: "http://results.invalid".to_string(),
            status: 503,
        })
    }
}

#[test]
fn test_sink_failures_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "file, not a directory").unwrap();
    let good = dir.path().join("report.json");

    let report = Orchestrator::new(quick_config(), profile(1))
        .run(&mut NoopObserver)
        .unwrap();

    let sinks: Vec<Box<dyn ReportSink>> = vec![
        Box::new(Rejecting),
        Box::new(FileWriter::new(blocker.join("report.json"))),
        Box::new(FileWriter::new(&good)),
    ];
    let failures = publish(&report, &sinks);

    let names: Vec<&str> = failures.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["rejecting", "file"]);
    assert!(good.exists());
}

#[test]
fn test_process_isolation_run() {
    let config = BenchConfig {
        isolation: IsolationMode::Process,
        worker_binary: Some(PathBuf::from(env!("CARGO_BIN_EXE_saturate"))),
        ..quick_config()
    };
    let profile = profile(2);

    let outcome = RunCoordinator::new(&config, &profile, 1)
        .run(&mut NoopObserver)
        .unwrap();
    let RunOutcome::Completed(result) = outcome else {
        panic!("expected a completed run");
    };

    assert_eq!(result.workers_spawned, 2);
    assert_eq!(result.active_workers_at_end, 2);
    assert!(result.total_calculations > 0);
    assert_eq!(
        result.per_worker_calculations.iter().sum::<u64>(),
        result.total_calculations
    );
    assert!(is_decimal(&result.largest_value));
    assert_eq!(result.configuration.isolation, "process");
    // Worker processes count toward resident memory
    let peak = result.peak_memory.unwrap();
    assert!(peak.external > 0);
}
