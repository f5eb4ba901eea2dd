#![warn(missing_docs)]
//! Saturate IPC Protocol
//!
//! Message types shared by both worker backends, the length-prefixed rkyv
//! framing used over worker-process pipes, and the batching that keeps
//! worker → coordinator message volume bounded.

mod batch;
mod framing;
mod messages;

pub use batch::{BatchPolicy, ReportBatcher, cmp_decimal, is_decimal};
pub use framing::{FrameError, FrameReader, FrameWriter, MAX_FRAME_SIZE, read_frame, write_frame};
pub use messages::{
    CoordinatorCommand, FailureKind, FlushReason, ReportBatch, WorkerCapabilities, WorkerConfig,
    WorkerMessage,
};

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Default unit limit per batch
pub const DEFAULT_MAX_BATCH_UNITS: u64 = 256;

/// Default flush interval in nanoseconds (50ms)
pub const DEFAULT_FLUSH_INTERVAL_NS: u64 = 50_000_000;

impl From<&WorkerConfig> for BatchPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_units: config.max_batch_units,
            flush_interval: std::time::Duration::from_nanos(config.flush_interval_ns),
        }
    }
}

impl From<BatchPolicy> for WorkerConfig {
    fn from(policy: BatchPolicy) -> Self {
        Self {
            max_batch_units: policy.max_units,
            flush_interval_ns: policy.flush_interval.as_nanos() as u64,
            pin_cpu: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_worker_config_conversion() {
        let policy = BatchPolicy::default();
        let config = WorkerConfig::from(policy);
        assert_eq!(config.max_batch_units, DEFAULT_MAX_BATCH_UNITS);
        assert_eq!(BatchPolicy::from(&config), policy);
    }
}
