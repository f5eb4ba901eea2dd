//! Workload
//!
//! The CPU burner: the Fibonacci number at a given index, computed
//! iteratively with arbitrary precision. Cost grows with the index (more
//! additions, wider operands), so the number of units a worker completes in a
//! fixed time is a throughput proxy.

use num_bigint::BigUint;
use num_traits::{One, Zero};

/// A work unit: maps an index to an arbitrary-precision result.
///
/// Must be deterministic and free of shared state.
pub type Workload = fn(u64) -> BigUint;

/// Fibonacci number at `index` with `fibonacci(0) == 0`, `fibonacci(1) == 1`.
///
/// O(index) additions over two rolling values; no recursion.
pub fn fibonacci(index: u64) -> BigUint {
    let mut prev = BigUint::zero();
    let mut curr = BigUint::one();
    if index == 0 {
        return prev;
    }
    for _ in 1..index {
        prev += &curr;
        std::mem::swap(&mut prev, &mut curr);
    }
    curr
}
