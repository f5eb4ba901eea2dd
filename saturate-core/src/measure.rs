//! Monotonic deadlines and CPU pinning
//!
//! Run durations are measured with `std::time::Instant` only; wall-clock time
//! is never used for timing so clock adjustments cannot stretch or shrink a
//! run.

use std::time::{Duration, Instant};

/// A point on the monotonic clock relative to a recorded start
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    at: Instant,
}

impl Deadline {
    /// Deadline `duration` from now
    pub fn after(duration: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            at: start + duration,
        }
    }

    /// Instant the deadline was created
    pub fn start(&self) -> Instant {
        self.start
    }

    /// Time since the deadline was created
    #[inline]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry (zero once expired)
    #[inline]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed
    #[inline]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

/// Number of logical cores available to this process, never less than 1
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Set CPU affinity to pin the current thread to a specific core
///
/// Keeps each worker on its own core for the whole run.
#[cfg(target_os = "linux")]
pub fn pin_to_cpu(cpu: usize) -> Result<(), std::io::Error> {
    use std::mem::MaybeUninit;

    unsafe {
        let mut set = MaybeUninit::<libc::cpu_set_t>::zeroed();
        let set_ref = set.assume_init_mut();

        libc::CPU_ZERO(set_ref);
        libc::CPU_SET(cpu, set_ref);

        let result = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), set_ref);

        if result == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    }
}

/// CPU pinning is not supported on this platform; always succeeds.
#[cfg(not(target_os = "linux"))]
pub fn pin_to_cpu(_cpu: usize) -> Result<(), std::io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Duration::from_millis(10));
        assert!(!deadline.is_expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(deadline.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_remaining_bounded_by_duration() {
        let deadline = Deadline::after(Duration::from_secs(5));
        assert!(deadline.remaining() <= Duration::from_secs(5));
        assert!(deadline.remaining() > Duration::from_secs(4));
    }

    #[test]
    fn test_available_cores_nonzero() {
        assert!(available_cores() >= 1);
    }
}
