//! Worker Process Supervisor
//!
//! Spawns one worker process per core and forwards their reports into the
//! run's event channel.
//!
//! Each worker re-executes the saturate binary with `--saturate-worker` and
//! talks over a pipe pair dup'd onto fd 3 (commands in) and fd 4 (messages
//! out). Every worker finishes its `Hello` handshake before any of them gets
//! `Start`, so all cores begin loading at the same moment; from then on a
//! reader thread per worker turns frames into [`RunEvent`]s. Stopping is
//! SIGTERM, and anything still alive when the coordinator finishes is
//! SIGKILLed.

use crate::pool::{RunEvent, WorkerPool};
use saturate_core::IPC_FD_ENV;
use saturate_ipc::{
    CoordinatorCommand, FailureKind, FrameError, FrameReader, FrameWriter, WorkerCapabilities,
    WorkerConfig, WorkerMessage,
};
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// How long a fresh worker gets to send `Hello`
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

/// Hidden flag that puts the binary into worker mode
pub const WORKER_FLAG: &str = "--saturate-worker";

/// Errors from spawning and talking to worker processes
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Pipe creation, process spawn or thread spawn failed
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(#[from] std::io::Error),

    /// A frame could not be exchanged with the worker
    #[error("IPC error: {0}")]
    IpcError(String),

    /// No `Hello` within the handshake timeout
    #[error("Timeout waiting for worker handshake")]
    Timeout,

    /// The worker sent an unexpected message
    #[error("Worker protocol error: expected {expected}, got {got}")]
    ProtocolError {
        /// Message the supervisor was waiting for
        expected: String,
        /// Message it received instead
        got: String,
    },
}

impl From<FrameError> for SupervisorError {
    fn from(e: FrameError) -> Self {
        SupervisorError::IpcError(e.to_string())
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: i32, timeout_ms: i32) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        PollResult::Error(std::io::Error::last_os_error())
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Even if the pipe is closing there might be data
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    // Set close-on-exec on both ends by default; we'll clear it for the ones we want to pass.
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

/// Lowest descriptor used while moving pipe ends into place in the child
const STAGING_FD_MIN: RawFd = 10;

/// Move each `(source, target)` descriptor pair into place in a forked child.
///
/// Sources are staged above [`STAGING_FD_MIN`] first, so installing one
/// target never clobbers the source of another even when a target number is
/// already taken by a pipe end. Installed targets are inheritable; every
/// other pipe end keeps `FD_CLOEXEC` and disappears at exec. Only
/// async-signal-safe calls are made here.
fn install_fds(moves: [(RawFd, RawFd); 2]) -> std::io::Result<()> {
    let mut staged = [-1 as RawFd; 2];
    for (slot, (source, _)) in staged.iter_mut().zip(moves) {
        let fd = unsafe { libc::fcntl(source, libc::F_DUPFD_CLOEXEC, STAGING_FD_MIN) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error());
        }
        *slot = fd;
    }
    for (fd, (_, target)) in staged.into_iter().zip(moves) {
        // dup2 clears FD_CLOEXEC on the target
        if unsafe { libc::dup2(fd, target) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
        close_fd(fd);
    }
    Ok(())
}

/// Close a raw file descriptor.
fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Send SIGTERM to a process. Returns `Err` if the signal could not be delivered.
fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// One worker process
pub struct WorkerProcess {
    worker_id: u32,
    child: Child,
    writer: FrameWriter<std::fs::File>,
    // Handed to the forwarder thread on start
    reader: Option<FrameReader<std::fs::File>>,
    capabilities: WorkerCapabilities,
    forwarder: Option<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Spawn a worker from `binary` and wait for its `Hello`.
    ///
    /// The worker idles until [`start`](Self::start) or [`cancel`](Self::cancel).
    pub fn spawn(binary: &Path, worker_id: u32) -> Result<Self, SupervisorError> {
        // cmd_pipe: supervisor writes commands → worker reads from fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg_pipe: worker writes messages from fd 4 → supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        // In the child: cmd_read→3, msg_write→4; the parent ends close at exec
        unsafe {
            command.pre_exec(move || install_fds([(cmd_read, 3), (msg_write, 4)]));
        }

        let spawned = command.spawn();
        // Child-side ends belong to the child now (or to nobody)
        close_fd(cmd_read);
        close_fd(msg_write);
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                close_fd(cmd_write);
                close_fd(msg_read);
                return Err(SupervisorError::SpawnFailed(e));
            }
        };

        let writer = FrameWriter::new(unsafe { std::fs::File::from_raw_fd(cmd_write) });
        let mut reader = FrameReader::new(unsafe { std::fs::File::from_raw_fd(msg_read) });

        let capabilities = match wait_for_hello(&mut reader, msg_read) {
            Ok(caps) => caps,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };
        tracing::debug!(
            worker_id,
            pid = capabilities.pid,
            cpus = capabilities.cpu_count,
            "worker process ready"
        );

        Ok(Self {
            worker_id,
            child,
            writer,
            reader: Some(reader),
            capabilities,
            forwarder: None,
        })
    }

    /// Send `Start` and forward the worker's messages into `events`
    pub fn start(
        &mut self,
        config: &WorkerConfig,
        events: Sender<RunEvent>,
    ) -> Result<(), SupervisorError> {
        let reader = self.reader.take().ok_or_else(|| {
            SupervisorError::IpcError(format!("worker {} already started", self.worker_id))
        })?;
        self.writer.write(&CoordinatorCommand::Start {
            worker_id: self.worker_id,
            config: config.clone(),
        })?;

        let worker_id = self.worker_id;
        let forwarder = std::thread::Builder::new()
            .name(format!("saturate-forward-{worker_id}"))
            .spawn(move || forward_messages(worker_id, reader, events))?;
        self.forwarder = Some(forwarder);
        Ok(())
    }

    /// Tell a worker that was never started to exit
    pub fn cancel(&mut self) {
        if self.reader.is_some() {
            if let Err(e) = self.writer.write(&CoordinatorCommand::Shutdown) {
                tracing::debug!(worker_id = self.worker_id, error = %e, "shutdown not delivered");
            }
        }
    }

    /// Logical CPUs the worker reported
    pub fn cpu_count(&self) -> u32 {
        self.capabilities.cpu_count
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Ask the worker to stop after its current unit
    pub fn request_stop(&mut self) {
        if self.is_alive() {
            if let Err(e) = send_sigterm(self.pid()) {
                tracing::debug!(worker_id = self.worker_id, error = %e, "SIGTERM not delivered");
            }
        }
    }

    /// Check if worker process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Reap the worker, killing it if it is still running. Returns whether it was killed.
    pub fn finish(&mut self) -> bool {
        let forced = if self.is_alive() {
            tracing::warn!(
                worker_id = self.worker_id,
                pid = self.pid(),
                "worker process still running after grace period, killing"
            );
            let _ = self.child.kill();
            true
        } else {
            false
        };
        let _ = self.child.wait();

        // The message pipe is closed now, so the forwarder sees end of stream
        if let Some(forwarder) = self.forwarder.take() {
            let _ = forwarder.join();
        }
        forced
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.is_alive() {
            // Graceful: SIGTERM first, brief wait, then SIGKILL
            let _ = send_sigterm(self.pid());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Wait for Hello message from worker and validate protocol version
fn wait_for_hello(
    reader: &mut FrameReader<std::fs::File>,
    fd: RawFd,
) -> Result<WorkerCapabilities, SupervisorError> {
    match wait_for_data(fd, HELLO_TIMEOUT.as_millis() as i32) {
        PollResult::DataAvailable => {}
        PollResult::Timeout => return Err(SupervisorError::Timeout),
        PollResult::PipeClosed => {
            return Err(SupervisorError::IpcError(
                "Worker pipe closed before handshake".to_string(),
            ));
        }
        PollResult::Error(e) => return Err(SupervisorError::IpcError(format!("Pipe error: {e}"))),
    }

    match reader.read::<WorkerMessage>()? {
        WorkerMessage::Hello(caps) => {
            if caps.protocol_version != saturate_ipc::PROTOCOL_VERSION {
                return Err(SupervisorError::ProtocolError {
                    expected: format!("protocol version {}", saturate_ipc::PROTOCOL_VERSION),
                    got: format!("protocol version {}", caps.protocol_version),
                });
            }
            Ok(caps)
        }
        other => Err(SupervisorError::ProtocolError {
            expected: "Hello".to_string(),
            got: format!("{:?}", other),
        }),
    }
}

/// Forward a worker's frames into the event channel until it stops or dies
fn forward_messages(
    worker_id: u32,
    mut reader: FrameReader<std::fs::File>,
    events: Sender<RunEvent>,
) {
    loop {
        let event = match reader.read::<WorkerMessage>() {
            Ok(WorkerMessage::Reports(batch)) => {
                if events.send(RunEvent::Reports(batch)).is_err() {
                    return;
                }
                continue;
            }
            Ok(WorkerMessage::Stopped { units_completed }) => RunEvent::WorkerStopped {
                worker_id,
                units_completed,
            },
            Ok(WorkerMessage::Failure { kind, message }) => RunEvent::WorkerFailed {
                worker_id,
                kind,
                message,
            },
            Ok(WorkerMessage::Hello(_)) => RunEvent::WorkerFailed {
                worker_id,
                kind: FailureKind::Protocol,
                message: "unexpected Hello after start".to_string(),
            },
            Err(FrameError::EndOfStream) => RunEvent::WorkerFailed {
                worker_id,
                kind: FailureKind::Crashed,
                message: "worker process exited without stopping".to_string(),
            },
            Err(e) => RunEvent::WorkerFailed {
                worker_id,
                kind: FailureKind::Crashed,
                message: format!("worker pipe error: {e}"),
            },
        };
        let _ = events.send(event);
        return;
    }
}

/// One worker process per core
pub struct ProcessWorkers {
    workers: Vec<WorkerProcess>,
}

impl ProcessWorkers {
    /// Spawn `count` worker processes from `binary` and start them together.
    ///
    /// Every worker completes its handshake before any is started. If one
    /// fails, the ones already waiting are sent `Shutdown` and reaped.
    pub fn spawn(
        binary: &Path,
        count: usize,
        config: &WorkerConfig,
        pin: bool,
        events: Sender<RunEvent>,
    ) -> Result<Self, SupervisorError> {
        let mut workers: Vec<WorkerProcess> = Vec::with_capacity(count);
        for worker_id in 0..count as u32 {
            match WorkerProcess::spawn(binary, worker_id) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    for worker in &mut workers {
                        worker.cancel();
                    }
                    return Err(e);
                }
            }
        }

        if let Some(first) = workers.first() {
            if (first.cpu_count() as usize) < count {
                tracing::debug!(
                    workers = count,
                    cpus = first.cpu_count(),
                    "more workers than CPUs visible to a worker"
                );
            }
        }

        for worker in &mut workers {
            let worker_config = WorkerConfig {
                pin_cpu: pin.then_some(worker.worker_id),
                ..config.clone()
            };
            // Dropping `workers` on error tears down the started ones
            worker.start(&worker_config, events.clone())?;
        }
        tracing::debug!(count, binary = %binary.display(), "worker processes started");
        Ok(Self { workers })
    }
}

impl WorkerPool for ProcessWorkers {
    fn len(&self) -> usize {
        self.workers.len()
    }

    fn pids(&self) -> Vec<u32> {
        self.workers.iter().map(WorkerProcess::pid).collect()
    }

    fn request_stop(&mut self) {
        for worker in &mut self.workers {
            worker.request_stop();
        }
    }

    fn finish(&mut self) -> usize {
        self.workers
            .iter_mut()
            .map(WorkerProcess::finish)
            .filter(|&forced| forced)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::sync::mpsc;

    #[test]
    fn test_install_fds_onto_taken_numbers() {
        // With fds 3 and 4 free the message end is moved onto the command
        // pipe's write end, and the command read end onto itself
        let (cmd_read, cmd_write) = create_pipe().unwrap();
        let (msg_read, msg_write) = create_pipe().unwrap();
        install_fds([(cmd_read, cmd_read), (msg_write, cmd_write)]).unwrap();

        for fd in [cmd_read, cmd_write] {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
            assert!(flags >= 0);
            assert_eq!(flags & libc::FD_CLOEXEC, 0);
        }

        let mut out = unsafe { File::from_raw_fd(cmd_write) };
        out.write_all(b"hello").unwrap();
        let mut input = unsafe { File::from_raw_fd(msg_read) };
        let mut buf = [0u8; 5];
        input.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        close_fd(cmd_read);
        close_fd(msg_write);
    }

    #[test]
    fn test_spawn_missing_binary_fails() {
        let (tx, _rx) = mpsc::channel();
        let result = ProcessWorkers::spawn(
            Path::new("/nonexistent/saturate-worker-binary"),
            2,
            &WorkerConfig::default(),
            false,
            tx,
        );
        assert!(matches!(result, Err(SupervisorError::SpawnFailed(_))));
    }

    #[test]
    fn test_non_worker_binary_fails_handshake() {
        // `true` exits immediately without speaking the protocol
        let result = WorkerProcess::spawn(Path::new("/bin/true"), 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_forwarder_reports_crash_on_end_of_stream() {
        let (tx, rx) = mpsc::channel();
        let file = tempfile::tempfile().unwrap();
        forward_messages(7, FrameReader::new(file), tx);
        match rx.recv().unwrap() {
            RunEvent::WorkerFailed {
                worker_id, kind, ..
            } => {
                assert_eq!(worker_id, 7);
                assert_eq!(kind, FailureKind::Crashed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
