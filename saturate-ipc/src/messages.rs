//! IPC Message Types
//!
//! Worker → coordinator traffic is one-way during a run: batches of completed
//! work units, a terminal `Stopped` or `Failure`. The only coordinator →
//! worker traffic is the `Start` command sent after the handshake; stopping is
//! signalled out of band (SIGTERM for worker processes, a stop flag for
//! worker threads).
//!
//! All messages are serialized with rkyv and validated on read.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};

/// A batch of completed work units from one worker.
///
/// A batch with `units == 1` carries exactly one work unit report; larger
/// batches fold consecutive units together without changing the totals or
/// the largest value the coordinator ends up with.
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct ReportBatch {
    /// Worker that produced the batch (0-based)
    pub worker_id: u32,
    /// Sequence number for ordering and detecting dropped batches
    pub sequence: u32,
    /// Number of completed work units in this batch (always >= 1)
    pub units: u64,
    /// Workload index of the first unit in the batch
    pub first_index: u64,
    /// Workload index of the last unit in the batch
    pub last_index: u64,
    /// Largest value computed in this batch, as a decimal string.
    ///
    /// Values routinely exceed every fixed-width integer type, so the wire
    /// form is never numeric.
    pub largest_value: String,
}

/// Why a batch left the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FlushReason {
    /// Unit limit of the batch policy reached
    BatchFull,
    /// Flush interval elapsed since the batch was opened
    IntervalElapsed,
    /// Worker is stopping; remaining units are flushed
    Shutdown,
}

/// Worker capabilities advertised during handshake
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerCapabilities {
    /// Protocol version for compatibility
    pub protocol_version: u32,
    /// OS process id of the worker
    pub pid: u32,
    /// Number of logical CPUs visible to the worker
    pub cpu_count: u32,
}

impl Default for WorkerCapabilities {
    fn default() -> Self {
        Self {
            protocol_version: crate::PROTOCOL_VERSION,
            pid: std::process::id(),
            cpu_count: std::thread::available_parallelism()
                .map(|p| p.get() as u32)
                .unwrap_or(1),
        }
    }
}

/// Messages sent from Worker to Coordinator
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum WorkerMessage {
    /// Initial handshake with worker capabilities
    Hello(WorkerCapabilities),

    /// Completed work units
    Reports(ReportBatch),

    /// Worker observed its stop request and exited the loop
    Stopped {
        /// Units completed (and reported) before the stop request
        units_completed: u64,
    },

    /// An iteration failed; the worker stops after sending this
    Failure {
        /// Error category
        kind: FailureKind,
        /// Human-readable error message
        message: String,
    },
}

/// Categories of worker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum FailureKind {
    /// Rust panic (caught) inside a work unit
    Panic,
    /// Worker process exited or closed its pipe without a `Stopped` message
    Crashed,
    /// Worker violated the protocol
    Protocol,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Panic => f.write_str("panic"),
            FailureKind::Crashed => f.write_str("crashed"),
            FailureKind::Protocol => f.write_str("protocol"),
        }
    }
}

/// Commands sent from Coordinator to Worker
#[derive(Debug, Clone, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub enum CoordinatorCommand {
    /// Begin the work loop
    Start {
        /// Worker identifier assigned by the coordinator
        worker_id: u32,
        /// Loop configuration
        config: WorkerConfig,
    },

    /// Exit without running (used when a run is torn down before start)
    Shutdown,
}

/// Configuration for a worker's loop
#[derive(Debug, Clone, PartialEq, Eq, Archive, RkyvSerialize, RkyvDeserialize)]
#[archive(check_bytes)]
pub struct WorkerConfig {
    /// Flush a batch once it holds this many units
    pub max_batch_units: u64,
    /// Flush a non-empty batch once it has been open this long (nanoseconds)
    pub flush_interval_ns: u64,
    /// Pin the worker to this CPU, if set
    pub pin_cpu: Option<u32>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_batch_units: crate::DEFAULT_MAX_BATCH_UNITS,
            flush_interval_ns: crate::DEFAULT_FLUSH_INTERVAL_NS,
            pin_cpu: None,
        }
    }
}

impl WorkerConfig {
    /// Validate configuration values, returning a description of the first error found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_batch_units == 0 {
            return Err("max_batch_units must be > 0".to_string());
        }
        Ok(())
    }
}
