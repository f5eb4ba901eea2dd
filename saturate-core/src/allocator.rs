//! Heap accounting
//!
//! `TrackingAllocator` wraps the system allocator and keeps a live byte
//! count. The memory sampler reads it as the heap component of each sample.
//! Without the allocator installed as `#[global_allocator]` the count stays 0.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Global allocator that counts live heap bytes
pub struct TrackingAllocator;

unsafe impl GlobalAlloc for TrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) };
        LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { System.alloc_zeroed(layout) };
        if !ptr.is_null() {
            record_alloc(layout.size());
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let new_ptr = unsafe { System.realloc(ptr, layout, new_size) };
        if !new_ptr.is_null() {
            if new_size > layout.size() {
                record_alloc(new_size - layout.size());
            } else {
                LIVE_BYTES.fetch_sub(layout.size() - new_size, Ordering::Relaxed);
            }
        }
        new_ptr
    }
}

#[inline]
fn record_alloc(size: usize) {
    LIVE_BYTES.fetch_add(size, Ordering::Relaxed);
}

/// Live heap bytes allocated through `TrackingAllocator`
pub fn heap_in_use() -> u64 {
    LIVE_BYTES.load(Ordering::Relaxed) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    // Drives the allocator directly; the test binary itself uses the system allocator.
    #[test]
    fn test_counts_live_bytes() {
        let before = heap_in_use();
        let layout = Layout::from_size_align(4096, 8).unwrap();
        unsafe {
            let ptr = TrackingAllocator.alloc(layout);
            assert!(!ptr.is_null());
            assert!(heap_in_use() >= before + 4096);

            let grown = TrackingAllocator.realloc(ptr, layout, 8192);
            assert!(!grown.is_null());
            assert!(heap_in_use() >= before + 8192);

            TrackingAllocator.dealloc(grown, Layout::from_size_align(8192, 8).unwrap());
        }
    }
}
