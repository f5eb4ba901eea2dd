//! Worker Loop and Worker Process Entry Point
//!
//! [`run_worker_loop`] is shared by both isolation modes: worker threads call
//! it directly with a channel-backed sink, worker processes call it through
//! [`WorkerMain`] with a pipe-backed sink.
//!
//! On Unix, worker processes use fd 3/4 for IPC (set via `SATURATE_IPC_FD`)
//! and install a SIGTERM handler for graceful shutdown. On non-Unix, falls
//! back to stdin/stdout and skips signal handling.

use crate::measure::pin_to_cpu;
use crate::workload::Workload;
use num_bigint::BigUint;
use saturate_ipc::{
    BatchPolicy, CoordinatorCommand, FailureKind, FrameError, FrameReader, FrameWriter,
    ReportBatch, ReportBatcher, WorkerCapabilities, WorkerMessage,
};
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Environment variable carrying the inherited `<read_fd>,<write_fd>` pair
pub const IPC_FD_ENV: &str = "SATURATE_IPC_FD";

/// Destination for flushed report batches
pub trait BatchSink {
    /// Delivery failure
    type Error;

    /// Hand one batch to the coordinator
    fn send(&mut self, batch: ReportBatch) -> Result<(), Self::Error>;
}

impl<W: Write> BatchSink for FrameWriter<W> {
    type Error = FrameError;

    fn send(&mut self, batch: ReportBatch) -> Result<(), FrameError> {
        self.write(&WorkerMessage::Reports(batch))
    }
}

/// How a worker loop ended without a stop request
#[derive(Debug, Error)]
pub enum WorkerError<E> {
    /// The workload panicked
    #[error("Work unit {index} panicked: {message}")]
    Panicked {
        /// Index of the unit that panicked
        index: u64,
        /// Panic payload as text
        message: String,
    },

    /// The sink rejected a batch
    #[error("Failed to deliver report: {0}")]
    Sink(#[source] E),
}

/// Totals for a worker loop that stopped on request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerSummary {
    /// Units completed before the stop request (all of them reported)
    pub units_completed: u64,
    /// Batches handed to the sink
    pub batches_sent: u32,
}

/// Run `workload` at indices 0, 1, 2, … until `should_stop` returns true.
///
/// `should_stop` is checked before every unit and again after it; a unit
/// that completes after the stop request is discarded. Every other completed
/// unit reaches `sink` before this returns, including when a unit panics.
pub fn run_worker_loop<S, F>(
    worker_id: u32,
    policy: BatchPolicy,
    workload: Workload,
    should_stop: F,
    sink: &mut S,
) -> Result<WorkerSummary, WorkerError<S::Error>>
where
    S: BatchSink,
    F: Fn() -> bool,
{
    let mut batcher = ReportBatcher::new(worker_id, policy);
    let mut batches_sent = 0u32;
    let mut index = 0u64;

    while !should_stop() {
        let value: BigUint = match panic::catch_unwind(AssertUnwindSafe(|| workload(index))) {
            Ok(value) => value,
            Err(payload) => {
                if let Some(batch) = batcher.flush_final() {
                    sink.send(batch).map_err(WorkerError::Sink)?;
                }
                return Err(WorkerError::Panicked {
                    index,
                    message: panic_message(payload.as_ref()),
                });
            }
        };

        if should_stop() {
            break;
        }

        if let Some((batch, reason)) = batcher.push(index, value) {
            tracing::trace!(worker_id, sequence = batch.sequence, ?reason, "flush");
            sink.send(batch).map_err(WorkerError::Sink)?;
            batches_sent += 1;
        }
        index += 1;
    }

    if let Some(batch) = batcher.flush_final() {
        sink.send(batch).map_err(WorkerError::Sink)?;
        batches_sent += 1;
    }

    Ok(WorkerSummary {
        units_completed: batcher.flushed_units(),
        batches_sent,
    })
}

/// Best-effort text of a caught panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// No-op on non-Unix (no SIGTERM equivalent).
#[cfg(not(unix))]
fn install_sigterm_handler() {}

/// IPC transport: either inherited fd pair or stdin/stdout fallback.
enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.parse::<i32>(), w.parse::<i32>()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        eprintln!(
            "saturate: warning: invalid {IPC_FD_ENV}={val:?} (expected format: <read_fd>,<write_fd>), falling back to stdio"
        );
    }
    IpcTransport::Stdio
}

/// Worker process main loop
pub struct WorkerMain {
    reader: FrameReader<Box<dyn std::io::Read>>,
    writer: FrameWriter<Box<dyn std::io::Write>>,
    workload: Workload,
}

impl WorkerMain {
    /// Create a worker, using fd 3/4 if `SATURATE_IPC_FD` is set, otherwise stdin/stdout.
    pub fn new(workload: Workload) -> Self {
        let (reader, writer): (Box<dyn std::io::Read>, Box<dyn std::io::Write>) =
            match detect_transport() {
                #[cfg(unix)]
                IpcTransport::Fds { read_fd, write_fd } => {
                    // SAFETY: the coordinator dup2'd these descriptors into the
                    // child before exec; nothing else in this process owns them.
                    let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                    let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                    (Box::new(read_file), Box::new(write_file))
                }
                IpcTransport::Stdio => (Box::new(std::io::stdin()), Box::new(std::io::stdout())),
            };

        Self::with_io(reader, writer, workload)
    }

    /// Create a worker over explicit command and message streams
    pub fn with_io(
        reader: Box<dyn std::io::Read>,
        writer: Box<dyn std::io::Write>,
        workload: Workload,
    ) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
            workload,
        }
    }

    /// Handshake, wait for `Start`, run until SIGTERM, report how it ended.
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        let command: CoordinatorCommand = self.reader.read()?;
        let (worker_id, config) = match command {
            CoordinatorCommand::Start { worker_id, config } => (worker_id, config),
            CoordinatorCommand::Shutdown => return Ok(()),
        };

        if let Err(message) = config.validate() {
            return self.writer.write(&WorkerMessage::Failure {
                kind: FailureKind::Protocol,
                message: format!("Invalid worker config: {message}"),
            });
        }

        if let Some(cpu) = config.pin_cpu {
            if let Err(e) = pin_to_cpu(cpu as usize) {
                eprintln!("saturate: warning: worker {worker_id} could not pin to cpu {cpu}: {e}");
            }
        }

        let policy = BatchPolicy::from(&config);
        match run_worker_loop(
            worker_id,
            policy,
            self.workload,
            shutdown_requested,
            &mut self.writer,
        ) {
            Ok(summary) => self.writer.write(&WorkerMessage::Stopped {
                units_completed: summary.units_completed,
            }),
            Err(WorkerError::Panicked { index, message }) => {
                self.writer.write(&WorkerMessage::Failure {
                    kind: FailureKind::Panic,
                    message: format!("work unit {index}: {message}"),
                })
            }
            Err(WorkerError::Sink(e)) => Err(e),
        }
    }
}
