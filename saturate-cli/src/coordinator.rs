//! Run Coordinator
//!
//! Drives one timed run through `Starting → Running → (Completing | Aborting)`.
//!
//! All aggregation happens on the calling thread. Workers and the memory
//! sampler only ever send [`RunEvent`]s; the coordinator waits on them with
//! `recv_timeout`, bounded by the next progress tick and the run deadline, so
//! it never blocks past either.
//!
//! Stopping is cooperative. After the deadline (or a memory limit signal) every
//! worker is asked to stop, and the coordinator keeps accepting reports until
//! each worker has sent its terminal event or the grace period runs out.
//! Batches flushed during the grace period count: they hold units completed
//! before the stop request.

use crate::config::BenchConfig;
use crate::orchestrator::RunObserver;
use crate::pool::{RunEvent, WorkerPool, spawn_workers};
use crate::supervisor::SupervisorError;
use chrono::Utc;
use saturate_core::{
    Deadline, MemorySample, MemorySampler, SamplerConfig, SamplerError, Workload, fibonacci,
};
use saturate_ipc::{ReportBatch, cmp_decimal};
use saturate_report::{AbortReason, MemoryReading, RunAbort, RunResult, SystemProfile};
use saturate_stats::{RunTotals, derive_metrics};
use std::cmp::Ordering;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default interval between progress callbacks
pub const DEFAULT_TICK: Duration = Duration::from_millis(250);

/// Errors that prevent a run from starting
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Workers could not be spawned or did not complete the handshake
    #[error("Failed to start workers for run {run_number}: {source}")]
    WorkerSpawn {
        /// Run that failed to start
        run_number: u32,
        /// Spawn or handshake error
        #[source]
        source: SupervisorError,
    },

    /// The memory sampler could not be started
    #[error("Failed to start memory sampler: {0}")]
    Sampler(#[from] SamplerError),
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Deadline reached (or every worker failed); metrics derived
    Completed(RunResult),
    /// Stopped early; no result
    Aborted(RunAbort),
}

/// Why the running phase ended
enum Ending {
    Deadline,
    WorkersGone,
    MemoryLimit(MemorySample),
}

/// Coordinates a single run
pub struct RunCoordinator<'a> {
    config: &'a BenchConfig,
    profile: &'a SystemProfile,
    run_number: u32,
    workload: Workload,
    tick: Duration,
}

impl<'a> RunCoordinator<'a> {
    /// Coordinator for run `run_number` (1-based) using the Fibonacci workload
    pub fn new(config: &'a BenchConfig, profile: &'a SystemProfile, run_number: u32) -> Self {
        Self {
            config,
            profile,
            run_number,
            workload: fibonacci,
            tick: DEFAULT_TICK,
        }
    }

    /// Replace the workload (thread isolation only; worker processes always
    /// run Fibonacci)
    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Change the progress tick
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Execute the run
    pub fn run(&self, observer: &mut dyn RunObserver) -> Result<RunOutcome, CoordinatorError> {
        let run_number = self.run_number;
        let core_count = self.profile.cores();
        let started_at = Utc::now();

        // Starting
        let (tx, rx) = mpsc::channel();
        let mut pool = spawn_workers(self.config, core_count, self.workload, tx.clone())
            .map_err(|source| CoordinatorError::WorkerSpawn { run_number, source })?;
        let workers_spawned = pool.len();

        let limit_tx = tx.clone();
        let sampler = MemorySampler::start(
            SamplerConfig {
                interval: self.config.sample_interval,
                limit_bytes: self.config.memory_limit_bytes(),
                worker_pids: pool.pids(),
            },
            move |sample| {
                let _ = limit_tx.send(RunEvent::MemoryLimitExceeded(sample));
            },
        );
        let sampler = match sampler {
            Ok(sampler) => sampler,
            Err(e) => {
                pool.request_stop();
                pool.finish();
                return Err(CoordinatorError::Sampler(e));
            }
        };
        // Only workers and the sampler hold senders from here on
        drop(tx);

        let deadline = Deadline::after(self.config.duration());
        tracing::debug!(run_number, workers_spawned, "run started");

        // Running
        let mut tally = RunTally::new(run_number, workers_spawned);
        let mut next_tick = Instant::now() + self.tick;
        let ending = loop {
            if deadline.is_expired() {
                break Ending::Deadline;
            }
            if tally.all_terminal() {
                break Ending::WorkersGone;
            }

            let wait = deadline
                .remaining()
                .min(next_tick.saturating_duration_since(Instant::now()));
            match rx.recv_timeout(wait) {
                Ok(RunEvent::MemoryLimitExceeded(sample)) => break Ending::MemoryLimit(sample),
                Ok(event) => tally.apply(event, observer),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break Ending::WorkersGone,
            }

            if Instant::now() >= next_tick {
                observer.on_progress(
                    run_number,
                    deadline.elapsed(),
                    self.config.duration(),
                    tally.total_units,
                );
                next_tick += self.tick;
            }
        };
        let active_at_end = tally.active_workers();

        // Completing / Aborting: stop, drain within grace, force stragglers
        pool.request_stop();
        tally.drain(&rx, self.config.grace_period, observer);
        let forced = pool.finish();
        if forced > 0 {
            tracing::warn!(run_number, forced, "workers forced down after grace period");
        }

        let stats = sampler.stop();
        let elapsed = deadline.elapsed();
        let reading = |sample: MemorySample| memory_reading(sample, deadline.start());

        if let Ending::MemoryLimit(sample) = ending {
            let limit_mb = self.config.max_memory_mb.unwrap_or_default();
            let abort = RunAbort {
                reason: AbortReason::RamLimitExceeded,
                run_number,
                message: format!(
                    "Resident memory {:.1} MB exceeded limit of {} MB",
                    sample.rss_mb(),
                    limit_mb
                ),
                elapsed_ms: elapsed.as_millis() as u64,
                memory: Some(reading(sample)),
            };
            tracing::info!(run_number, rss_mb = sample.rss_mb(), "run aborted on memory limit");
            return Ok(RunOutcome::Aborted(abort));
        }

        let totals = RunTotals {
            total_units: tally.total_units,
            elapsed,
            core_count,
            per_worker_units: tally.per_worker.clone(),
            workers_spawned,
            active_workers: active_at_end,
            peak_rss_bytes: stats.peak.map(|s| s.rss_bytes),
        };
        let mut assessment = derive_metrics(&totals, self.config.core_efficiency);

        if matches!(ending, Ending::WorkersGone) {
            assessment.degraded = true;
            assessment
                .warnings
                .push("All workers failed before the deadline; run ended early".to_string());
        }
        if forced > 0 {
            assessment.warnings.push(format!(
                "{forced} worker(s) did not stop within the grace period"
            ));
        }

        let result = RunResult {
            run_number,
            started_at,
            configuration: self.config.snapshot(core_count),
            duration_ms: elapsed.as_millis() as u64,
            total_calculations: tally.total_units,
            average_calculations_per_core: assessment.metrics.average_per_core,
            largest_value: tally.largest_value,
            highest_index: tally.highest_index,
            per_worker_calculations: tally.per_worker,
            workers_spawned,
            active_workers_at_end: active_at_end,
            forced_terminations: forced,
            metrics: assessment.metrics,
            degraded: assessment.degraded,
            warnings: assessment.warnings,
            peak_memory: stats.peak.map(reading),
            final_memory: stats.latest.map(reading),
        };

        tracing::info!(
            run_number,
            units = result.total_calculations,
            score = ?result.metrics.overall_score,
            degraded = result.degraded,
            "run completed"
        );
        Ok(RunOutcome::Completed(result))
    }
}

fn memory_reading(sample: MemorySample, run_start: Instant) -> MemoryReading {
    MemoryReading {
        rss: sample.rss_bytes,
        heap: sample.heap_bytes,
        external: sample.external_bytes,
        buffers: sample.buffer_bytes,
        offset_ms: sample.taken_at.saturating_duration_since(run_start).as_millis() as u64,
    }
}

/// Aggregates of one run, mutated only on the coordinator thread
struct RunTally {
    run_number: u32,
    total_units: u64,
    per_worker: Vec<u64>,
    largest_value: String,
    highest_index: u64,
    terminal: Vec<bool>,
    failed: Vec<bool>,
}

impl RunTally {
    fn new(run_number: u32, workers: usize) -> Self {
        Self {
            run_number,
            total_units: 0,
            per_worker: vec![0; workers],
            largest_value: "0".to_string(),
            highest_index: 0,
            terminal: vec![false; workers],
            failed: vec![false; workers],
        }
    }

    fn all_terminal(&self) -> bool {
        self.terminal.iter().all(|&t| t)
    }

    fn active_workers(&self) -> usize {
        self.failed.iter().filter(|&&f| !f).count()
    }

    fn apply(&mut self, event: RunEvent, observer: &mut dyn RunObserver) {
        match event {
            RunEvent::Reports(batch) => self.add_batch(batch),
            RunEvent::WorkerStopped {
                worker_id,
                units_completed,
            } => {
                let Some(slot) = self.terminal.get_mut(worker_id as usize) else {
                    tracing::warn!(worker_id, "stop from unknown worker");
                    return;
                };
                *slot = true;
                tracing::debug!(
                    run_number = self.run_number,
                    worker_id,
                    units_completed,
                    "worker stopped"
                );
            }
            RunEvent::WorkerFailed {
                worker_id,
                kind,
                message,
            } => {
                let index = worker_id as usize;
                if index >= self.terminal.len() {
                    tracing::warn!(worker_id, "failure from unknown worker");
                    return;
                }
                // A worker killed after the grace period is not a failure
                if self.terminal[index] {
                    return;
                }
                self.terminal[index] = true;
                self.failed[index] = true;
                tracing::warn!(
                    run_number = self.run_number,
                    worker_id,
                    %kind,
                    %message,
                    "worker failed"
                );
                observer.on_worker_failed(self.run_number, worker_id, &message);
            }
            RunEvent::MemoryLimitExceeded(_) => {}
        }
    }

    fn add_batch(&mut self, batch: ReportBatch) {
        let Some(count) = self.per_worker.get_mut(batch.worker_id as usize) else {
            tracing::warn!(worker_id = batch.worker_id, "report from unknown worker");
            return;
        };
        if batch.units == 0 {
            return;
        }
        *count += batch.units;
        self.total_units += batch.units;
        self.highest_index = self.highest_index.max(batch.last_index);
        if cmp_decimal(&batch.largest_value, &self.largest_value) == Ordering::Greater {
            self.largest_value = batch.largest_value;
        }
    }

    /// Accept final flushes until every worker is terminal or `grace` elapses
    fn drain(&mut self, rx: &Receiver<RunEvent>, grace: Duration, observer: &mut dyn RunObserver) {
        let grace = Deadline::after(grace);
        while !self.all_terminal() {
            match rx.recv_timeout(grace.remaining()) {
                Ok(event) => self.apply(event, observer),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}
