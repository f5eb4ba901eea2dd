//! Memory Sampler
//!
//! Polls resident memory on its own thread at a fixed interval, independent
//! of worker traffic, so the numbers include channel backlog, scheduling
//! overhead and the big integers themselves.
//!
//! Only the peak sample (by resident bytes) and the latest sample are kept.
//! When a limit is configured and a sample exceeds it, the limit callback
//! fires exactly once and sampling stops. Enforcing the limit is left to the
//! caller.
//!
//! ## Sample components
//!
//! | Field            | Source                                                      |
//! |------------------|-------------------------------------------------------------|
//! | `rss_bytes`      | resident set of this process plus every worker process      |
//! | `heap_bytes`     | live bytes seen by [`TrackingAllocator`](crate::TrackingAllocator) |
//! | `external_bytes` | resident set of worker processes (0 with worker threads)    |
//! | `buffer_bytes`   | file-backed and shared resident pages (Linux only, else 0)  |

use crate::allocator::heap_in_use;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

/// Default polling interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One memory reading
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    /// Resident bytes of the whole benchmark (coordinator + worker processes)
    pub rss_bytes: u64,
    /// Live heap bytes in the coordinator process
    pub heap_bytes: u64,
    /// Resident bytes held outside the coordinator process
    pub external_bytes: u64,
    /// File-backed and shared resident bytes
    pub buffer_bytes: u64,
    /// Monotonic timestamp of the reading
    pub taken_at: Instant,
}

impl MemorySample {
    /// Resident memory in MiB
    pub fn rss_mb(&self) -> f64 {
        self.rss_bytes as f64 / BYTES_PER_MB
    }
}

/// Sampler settings
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Time between samples
    pub interval: Duration,
    /// Resident byte ceiling; exceeding it fires the limit callback
    pub limit_bytes: Option<u64>,
    /// Worker processes whose memory counts toward the total
    pub worker_pids: Vec<u32>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SAMPLE_INTERVAL,
            limit_bytes: None,
            worker_pids: Vec::new(),
        }
    }
}

/// What the sampler saw over its lifetime
#[derive(Debug, Clone, Default)]
pub struct MemoryStats {
    /// Sample with the highest resident bytes
    pub peak: Option<MemorySample>,
    /// Most recent sample
    pub latest: Option<MemorySample>,
    /// Number of successful samples
    pub samples_taken: u64,
    /// Whether the limit callback fired
    pub limit_exceeded: bool,
}

/// Errors raised while starting the sampler
#[derive(Debug, Error)]
pub enum SamplerError {
    /// The sampler thread could not be spawned
    #[error("Failed to spawn memory sampler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Peak/latest bookkeeping, bounded regardless of run length
#[derive(Debug, Default)]
struct PeakTracker {
    stats: MemoryStats,
}

impl PeakTracker {
    fn observe(&mut self, sample: MemorySample) {
        let is_peak = self
            .stats
            .peak
            .is_none_or(|peak| sample.rss_bytes > peak.rss_bytes);
        if is_peak {
            self.stats.peak = Some(sample);
        }
        self.stats.latest = Some(sample);
        self.stats.samples_taken += 1;
    }
}

/// Handle to a running sampler thread
pub struct MemorySampler {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<MemoryStats>>,
}

impl MemorySampler {
    /// Start sampling. The first sample is taken immediately.
    pub fn start<F>(config: SamplerConfig, on_limit: F) -> Result<Self, SamplerError>
    where
        F: FnOnce(MemorySample) + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name("saturate-sampler".to_string())
            .spawn(move || sample_loop(config, stop_rx, on_limit))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop sampling and return what was observed.
    ///
    /// Takes one last sample unless the limit already stopped the thread.
    pub fn stop(mut self) -> MemoryStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> MemoryStats {
        // Dropping the sender wakes the thread immediately
        self.stop_tx.take();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                tracing::warn!("memory sampler thread panicked");
                MemoryStats::default()
            }),
            None => MemoryStats::default(),
        }
    }
}

impl Drop for MemorySampler {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown();
        }
    }
}

fn sample_loop<F>(config: SamplerConfig, stop_rx: mpsc::Receiver<()>, on_limit: F) -> MemoryStats
where
    F: FnOnce(MemorySample),
{
    let mut probe = ProcessProbe::new(&config.worker_pids);
    let mut tracker = PeakTracker::default();
    let mut on_limit = Some(on_limit);

    loop {
        match probe.sample() {
            Some(sample) => {
                let exceeded = config
                    .limit_bytes
                    .is_some_and(|limit| sample.rss_bytes > limit);
                tracker.observe(sample);

                if exceeded {
                    tracing::debug!(
                        rss_bytes = sample.rss_bytes,
                        limit_bytes = config.limit_bytes,
                        "memory limit exceeded"
                    );
                    tracker.stats.limit_exceeded = true;
                    if let Some(callback) = on_limit.take() {
                        callback(sample);
                    }
                    return tracker.stats;
                }
            }
            None => tracing::debug!("memory sample unavailable"),
        }

        match stop_rx.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(sample) = probe.sample() {
        tracker.observe(sample);
    }
    tracker.stats
}

/// Reads resident memory for this process and the worker processes
struct ProcessProbe {
    system: System,
    own: Pid,
    workers: Vec<Pid>,
}

impl ProcessProbe {
    fn new(worker_pids: &[u32]) -> Self {
        Self {
            system: System::new(),
            own: Pid::from_u32(std::process::id()),
            workers: worker_pids.iter().map(|&pid| Pid::from_u32(pid)).collect(),
        }
    }

    fn sample(&mut self) -> Option<MemorySample> {
        let mut pids = Vec::with_capacity(self.workers.len() + 1);
        pids.push(self.own);
        pids.extend_from_slice(&self.workers);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&pids),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        let own_rss = self.system.process(self.own)?.memory();
        let external: u64 = self
            .workers
            .iter()
            .filter_map(|pid| self.system.process(*pid))
            .map(|process| process.memory())
            .sum();

        Some(MemorySample {
            rss_bytes: own_rss + external,
            heap_bytes: heap_in_use(),
            external_bytes: external,
            buffer_bytes: resident_shared_bytes(),
            taken_at: Instant::now(),
        })
    }
}

#[cfg(target_os = "linux")]
fn resident_shared_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .map(|status| sum_status_kb(&status, &["RssFile:", "RssShmem:"]))
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn resident_shared_bytes() -> u64 {
    0
}

/// Sum `kB` values of the given `/proc/<pid>/status` keys, in bytes
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn sum_status_kb(status: &str, keys: &[&str]) -> u64 {
    status
        .lines()
        .filter(|line| keys.iter().any(|key| line.starts_with(key)))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
        .sum()
}
