#![warn(missing_docs)]
//! Saturate Core - Worker Runtime
//!
//! This crate provides everything that runs while a benchmark saturates the
//! machine:
//! - The Fibonacci workload that burns CPU
//! - The worker loop shared by worker threads and worker processes
//! - The worker-process entry point (`WorkerMain`)
//! - A memory sampler with a limit callback
//! - Global allocator interceptor for heap accounting
//! - Monotonic deadlines and CPU affinity pinning

mod allocator;
mod measure;
mod sampler;
mod worker;
mod workload;

pub use allocator::{TrackingAllocator, heap_in_use};
pub use measure::{Deadline, available_cores, pin_to_cpu};
pub use sampler::{
    DEFAULT_SAMPLE_INTERVAL, MemorySample, MemorySampler, MemoryStats, SamplerConfig, SamplerError,
};
pub use worker::{
    BatchSink, IPC_FD_ENV, WorkerError, WorkerMain, WorkerSummary, panic_message,
    run_worker_loop, shutdown_requested,
};
pub use workload::{Workload, fibonacci};
