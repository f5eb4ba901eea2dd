//! Run Orchestration
//!
//! Runs the configured number of coordinators back to back, with a cooldown
//! between runs, and assembles the final [`BenchmarkReport`].
//!
//! A memory limit abort ends the sequence; the report then carries the runs
//! completed so far plus the abort. A run that cannot start at all is fatal
//! only when it is the first one.

use crate::config::BenchConfig;
use crate::coordinator::{CoordinatorError, RunCoordinator, RunOutcome};
use chrono::Utc;
use saturate_core::{Workload, fibonacci};
use saturate_report::{
    AbortReason, BenchmarkInfo, BenchmarkReport, RunAbort, RunResult, SCHEMA_VERSION,
    SystemProfile,
};
use saturate_stats::{RunScore, summarize_scores};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Receives lifecycle callbacks while a benchmark runs.
///
/// Every method has a no-op default so observers only implement what they
/// display.
pub trait RunObserver {
    /// Run `run_number` of `total_runs` is starting on `cores` workers
    fn on_run_start(&mut self, run_number: u32, total_runs: u32, cores: usize) {
        let _ = (run_number, total_runs, cores);
    }

    /// Periodic progress from the coordinator
    fn on_progress(&mut self, run_number: u32, elapsed: Duration, duration: Duration, units: u64) {
        let _ = (run_number, elapsed, duration, units);
    }

    /// A worker failed; the run continues without it
    fn on_worker_failed(&mut self, run_number: u32, worker_id: u32, message: &str) {
        let _ = (run_number, worker_id, message);
    }

    /// A run finished with a result
    fn on_run_complete(&mut self, result: &RunResult) {
        let _ = result;
    }

    /// A run ended without a result and the sequence stops
    fn on_run_aborted(&mut self, abort: &RunAbort) {
        let _ = abort;
    }

    /// Pausing before the next run
    fn on_cooldown(&mut self, after_run: u32, cooldown: Duration) {
        let _ = (after_run, cooldown);
    }
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Errors that end a benchmark without a report
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The first run failed to start
    #[error("No benchmark run could be started: {0}")]
    NoRunStarted(#[source] CoordinatorError),
}

/// Runs the whole benchmark sequence
pub struct Orchestrator {
    config: BenchConfig,
    profile: SystemProfile,
    workload: Workload,
}

impl Orchestrator {
    /// Create an orchestrator; run count and core count are clamped to at least 1
    pub fn new(mut config: BenchConfig, mut profile: SystemProfile) -> Self {
        config.run_count = config.run_count.max(1);
        profile.core_count = profile.cores();
        Self {
            config,
            profile,
            workload: fibonacci,
        }
    }

    /// Replace the workload for thread-isolated runs
    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Resolved configuration in use
    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Execute every run and build the report
    pub fn run(
        &self,
        observer: &mut dyn RunObserver,
    ) -> Result<BenchmarkReport, OrchestratorError> {
        let total_runs = self.config.run_count;
        let cores = self.profile.cores();
        let started_at = Utc::now();
        let start = Instant::now();

        tracing::info!(
            runs = total_runs,
            cores,
            duration_seconds = self.config.duration_seconds,
            isolation = %self.config.isolation,
            "starting benchmark"
        );

        let mut results: Vec<RunResult> = Vec::with_capacity(total_runs as usize);
        let mut abort: Option<RunAbort> = None;

        for run_number in 1..=total_runs {
            if run_number > 1 && !self.config.cooldown.is_zero() {
                observer.on_cooldown(run_number - 1, self.config.cooldown);
                std::thread::sleep(self.config.cooldown);
            }

            observer.on_run_start(run_number, total_runs, cores);
            let run_start = Instant::now();
            let outcome = RunCoordinator::new(&self.config, &self.profile, run_number)
                .with_workload(self.workload)
                .run(observer);

            match outcome {
                Ok(RunOutcome::Completed(result)) => {
                    observer.on_run_complete(&result);
                    results.push(result);
                }
                Ok(RunOutcome::Aborted(run_abort)) => {
                    observer.on_run_aborted(&run_abort);
                    abort = Some(run_abort);
                    break;
                }
                Err(e) if run_number == 1 => return Err(OrchestratorError::NoRunStarted(e)),
                Err(e) => {
                    let reason = match e {
                        CoordinatorError::WorkerSpawn { .. } => AbortReason::WorkerSpawnFailed,
                        CoordinatorError::Sampler(_) => AbortReason::SamplerFailed,
                    };
                    tracing::warn!(
                        run_number,
                        error = %e,
                        "run could not start; stopping sequence"
                    );
                    let run_abort = RunAbort {
                        reason,
                        run_number,
                        message: e.to_string(),
                        elapsed_ms: run_start.elapsed().as_millis() as u64,
                        memory: None,
                    };
                    observer.on_run_aborted(&run_abort);
                    abort = Some(run_abort);
                    break;
                }
            }
        }

        let scores: Vec<RunScore> = results
            .iter()
            .map(|r| RunScore {
                total_units: r.total_calculations,
                overall_score: r.metrics.overall_score,
            })
            .collect();
        let aggregated_results = summarize_scores(&scores);

        let benchmark_info = BenchmarkInfo {
            name: "saturate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            schema_version: SCHEMA_VERSION,
            started_at,
            finished_at: Utc::now(),
            total_runs,
            completed_runs: results.len() as u32,
            total_duration_ms: start.elapsed().as_millis() as u64,
            abort,
        };

        tracing::info!(
            completed = benchmark_info.completed_runs,
            aborted = benchmark_info.abort.is_some(),
            "benchmark finished"
        );

        Ok(BenchmarkReport {
            benchmark_info,
            system_info: self.profile.clone(),
            configuration: self.config.snapshot(cores),
            aggregated_results,
            individual_runs: results,
        })
    }
}
