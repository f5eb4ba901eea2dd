//! Report batching
//!
//! Workers finish thousands of units per second. Reporting each one is what
//! the protocol models (a batch of one unit), but the batcher folds
//! consecutive units into a single [`ReportBatch`] that flushes when it is
//! full or has been open for the flush interval. Totals and the largest
//! value are identical to per-unit reporting; only message count changes.

use crate::messages::{FlushReason, ReportBatch};
use num_bigint::BigUint;
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// When a worker flushes its pending batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Flush once this many units are pending (1 = report every unit)
    pub max_units: u64,
    /// Flush a non-empty batch once it has been open this long
    pub flush_interval: Duration,
}

impl BatchPolicy {
    /// One message per completed unit
    pub fn per_unit() -> Self {
        Self {
            max_units: 1,
            flush_interval: Duration::ZERO,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_units: crate::DEFAULT_MAX_BATCH_UNITS,
            flush_interval: Duration::from_nanos(crate::DEFAULT_FLUSH_INTERVAL_NS),
        }
    }
}

struct PendingBatch {
    opened: Instant,
    units: u64,
    first_index: u64,
    last_index: u64,
    largest: BigUint,
}

/// Accumulates completed units for one worker
pub struct ReportBatcher {
    worker_id: u32,
    policy: BatchPolicy,
    sequence: u32,
    pending: Option<PendingBatch>,
    flushed_units: u64,
}

impl ReportBatcher {
    /// Create a batcher for `worker_id`
    pub fn new(worker_id: u32, policy: BatchPolicy) -> Self {
        Self {
            worker_id,
            policy: BatchPolicy {
                max_units: policy.max_units.max(1),
                ..policy
            },
            sequence: 0,
            pending: None,
            flushed_units: 0,
        }
    }

    /// Record one completed unit. Returns a batch if the policy says to flush.
    pub fn push(&mut self, index: u64, value: BigUint) -> Option<(ReportBatch, FlushReason)> {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.units += 1;
                pending.last_index = index;
                if value > pending.largest {
                    pending.largest = value;
                }
            }
            None => {
                self.pending = Some(PendingBatch {
                    opened: Instant::now(),
                    units: 1,
                    first_index: index,
                    last_index: index,
                    largest: value,
                });
            }
        }

        let pending = self.pending.as_ref()?;
        if pending.units >= self.policy.max_units {
            self.take(FlushReason::BatchFull)
        } else if pending.opened.elapsed() >= self.policy.flush_interval {
            self.take(FlushReason::IntervalElapsed)
        } else {
            None
        }
    }

    /// Flush whatever is pending (worker stopping or failing)
    pub fn flush_final(&mut self) -> Option<ReportBatch> {
        self.take(FlushReason::Shutdown).map(|(batch, _)| batch)
    }

    /// Units handed out in batches so far
    pub fn flushed_units(&self) -> u64 {
        self.flushed_units
    }

    fn take(&mut self, reason: FlushReason) -> Option<(ReportBatch, FlushReason)> {
        let pending = self.pending.take()?;
        let batch = ReportBatch {
            worker_id: self.worker_id,
            sequence: self.sequence,
            units: pending.units,
            first_index: pending.first_index,
            last_index: pending.last_index,
            largest_value: pending.largest.to_str_radix(10),
        };
        self.sequence = self.sequence.wrapping_add(1);
        self.flushed_units += pending.units;
        Some((batch, reason))
    }
}

/// Whether `s` is a non-empty run of ASCII digits
pub fn is_decimal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Compare two non-negative decimal strings by numeric value.
///
/// Exact for any magnitude: after stripping leading zeros a longer string is
/// the larger number, equal lengths compare digit by digit. Callers must pass
/// strings that satisfy [`is_decimal`].
pub fn cmp_decimal(a: &str, b: &str) -> Ordering {
    let a = strip_leading_zeros(a);
    let b = strip_leading_zeros(b);
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn strip_leading_zeros(s: &str) -> &str {
    let trimmed = s.trim_start_matches('0');
    if trimmed.is_empty() { "0" } else { trimmed }
}
