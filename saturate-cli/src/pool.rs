//! Worker Pools
//!
//! A run needs one worker per core, each feeding the coordinator through a
//! single `mpsc` channel. Two backends provide them:
//!
//! - [`ThreadWorkers`]: OS threads in this process, stopped through a shared
//!   flag checked between work units.
//! - [`ProcessWorkers`](crate::ProcessWorkers): one child process per worker,
//!   stopped with SIGTERM, reports forwarded from its pipe by a reader thread.
//!
//! Either way the coordinator sees the same [`RunEvent`] stream and drives
//! the same [`WorkerPool`] lifecycle: request stop, drain, finish.

use crate::config::{BenchConfig, IsolationMode};
use crate::supervisor::{ProcessWorkers, SupervisorError};
use saturate_core::{
    BatchSink, MemorySample, WorkerError, Workload, pin_to_cpu, run_worker_loop,
};
use saturate_ipc::{BatchPolicy, FailureKind, ReportBatch, WorkerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{SendError, Sender};
use std::thread::JoinHandle;

/// Everything the coordinator receives during a run
#[derive(Debug)]
pub enum RunEvent {
    /// Completed work units from one worker
    Reports(ReportBatch),
    /// A worker observed its stop request and exited cleanly
    WorkerStopped {
        /// Worker index within the run
        worker_id: u32,
        /// Units the worker reported before stopping
        units_completed: u64,
    },
    /// A worker failed and will send nothing more
    WorkerFailed {
        /// Worker index within the run
        worker_id: u32,
        /// Failure category
        kind: FailureKind,
        /// Human-readable cause
        message: String,
    },
    /// The memory sampler saw resident memory above the limit
    MemoryLimitExceeded(MemorySample),
}

/// Workers of one run
pub trait WorkerPool {
    /// Number of workers spawned
    fn len(&self) -> usize;

    /// Whether no workers were spawned
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// OS process ids of worker processes (empty for worker threads)
    fn pids(&self) -> Vec<u32>;

    /// Ask every worker to stop after its current unit. Does not wait.
    fn request_stop(&mut self);

    /// Reap workers that have exited and force down the rest.
    ///
    /// Returns how many workers had to be forced.
    fn finish(&mut self) -> usize;
}

/// Spawn `count` workers for a run according to the configured isolation mode
pub fn spawn_workers(
    config: &BenchConfig,
    count: usize,
    workload: Workload,
    events: Sender<RunEvent>,
) -> Result<Box<dyn WorkerPool>, SupervisorError> {
    match config.isolation {
        IsolationMode::Thread => Ok(Box::new(ThreadWorkers::spawn(
            count,
            config.batch,
            config.pin_workers,
            workload,
            events,
        )?)),
        IsolationMode::Process => {
            let binary = match &config.worker_binary {
                Some(path) => path.clone(),
                None => std::env::current_exe().map_err(SupervisorError::SpawnFailed)?,
            };
            let worker_config = WorkerConfig::from(config.batch);
            Ok(Box::new(ProcessWorkers::spawn(
                &binary,
                count,
                &worker_config,
                config.pin_workers,
                events,
            )?))
        }
    }
}

/// Sends flushed batches into the run's event channel
struct ChannelSink {
    events: Sender<RunEvent>,
}

impl BatchSink for ChannelSink {
    type Error = SendError<RunEvent>;

    fn send(&mut self, batch: ReportBatch) -> Result<(), Self::Error> {
        self.events.send(RunEvent::Reports(batch))
    }
}

/// One OS thread per worker
pub struct ThreadWorkers {
    stop: Arc<AtomicBool>,
    handles: Vec<WorkerThread>,
}

struct WorkerThread {
    handle: JoinHandle<()>,
    exited: Arc<AtomicBool>,
}

impl ThreadWorkers {
    /// Spawn `count` named worker threads
    pub fn spawn(
        count: usize,
        policy: BatchPolicy,
        pin: bool,
        workload: Workload,
        events: Sender<RunEvent>,
    ) -> Result<Self, SupervisorError> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(count);

        for worker_id in 0..count as u32 {
            let stop_flag = Arc::clone(&stop);
            let exited = Arc::new(AtomicBool::new(false));
            let exited_flag = Arc::clone(&exited);
            let events = events.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("saturate-worker-{worker_id}"))
                .spawn(move || {
                    let last =
                        thread_worker_main(worker_id, policy, pin, workload, &stop_flag, &events);
                    exited_flag.store(true, Ordering::Release);
                    if let Some(event) = last {
                        let _ = events.send(event);
                    }
                });

            match spawned {
                Ok(handle) => handles.push(WorkerThread { handle, exited }),
                Err(e) => {
                    // Already-running workers exit at their next stop check
                    stop.store(true, Ordering::Relaxed);
                    return Err(SupervisorError::SpawnFailed(e));
                }
            }
        }

        tracing::debug!(count, "worker threads spawned");
        Ok(Self { stop, handles })
    }
}

/// Runs the loop on a worker thread and returns the terminal event to send
fn thread_worker_main(
    worker_id: u32,
    policy: BatchPolicy,
    pin: bool,
    workload: Workload,
    stop: &AtomicBool,
    events: &Sender<RunEvent>,
) -> Option<RunEvent> {
    if pin {
        if let Err(e) = pin_to_cpu(worker_id as usize) {
            tracing::warn!(worker_id, error = %e, "could not pin worker thread");
        }
    }

    let mut sink = ChannelSink {
        events: events.clone(),
    };
    match run_worker_loop(
        worker_id,
        policy,
        workload,
        || stop.load(Ordering::Relaxed),
        &mut sink,
    ) {
        Ok(summary) => Some(RunEvent::WorkerStopped {
            worker_id,
            units_completed: summary.units_completed,
        }),
        Err(WorkerError::Panicked { index, message }) => Some(RunEvent::WorkerFailed {
            worker_id,
            kind: FailureKind::Panic,
            message: format!("work unit {index}: {message}"),
        }),
        // Coordinator is gone; nobody is listening
        Err(WorkerError::Sink(_)) => None,
    }
}

impl WorkerPool for ThreadWorkers {
    fn len(&self) -> usize {
        self.handles.len()
    }

    fn pids(&self) -> Vec<u32> {
        Vec::new()
    }

    fn request_stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn finish(&mut self) -> usize {
        self.stop.store(true, Ordering::Relaxed);
        let mut detached = 0;
        for worker in self.handles.drain(..) {
            if worker.exited.load(Ordering::Acquire) {
                let _ = worker.handle.join();
            } else {
                // Threads cannot be killed; it exits at its next stop check
                let name = worker.handle.thread().name().unwrap_or("worker").to_string();
                tracing::warn!(
                    thread = %name,
                    "worker thread still busy after grace period, detaching"
                );
                detached += 1;
            }
        }
        detached
    }
}

impl Drop for ThreadWorkers {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
