//! Property-based tests for the collector.
//!
//! Uses proptest to generate allocation patterns and verify the block-state
//! invariants hold.

use std::alloc::{alloc, dealloc, Layout};

use proptest::prelude::*;

use mica_runtime::gc::{BlockState, GcHeap, RootRegions, BYTES_PER_BLOCK};

/// Word-aligned raw backing storage for a test heap.
struct TestRegion {
    pointer: *mut u8,
    layout: Layout,
}

impl TestRegion {
    fn new(size: usize) -> TestRegion {
        let layout = Layout::from_size_align(size, BYTES_PER_BLOCK).unwrap();
        let pointer = unsafe { alloc(layout) };
        assert!(!pointer.is_null());
        TestRegion { pointer, layout }
    }

    fn start(&self) -> usize {
        self.pointer as usize
    }

    fn end(&self) -> usize {
        self.start() + self.layout.size()
    }
}

impl Drop for TestRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.pointer, self.layout) };
    }
}

/// Strategy for a plausible object size: a few bytes up to several blocks.
fn object_size() -> impl Strategy<Value = usize> {
    1usize..=6 * BYTES_PER_BLOCK
}

proptest! {
    /// An allocation claims exactly one head and `ceil(size / block) - 1`
    /// tails, at a block-aligned address inside the pool.
    #[test]
    fn allocation_claims_the_expected_blocks(size in object_size()) {
        let region = TestRegion::new(64 * BYTES_PER_BLOCK);
        let mut heap = unsafe { GcHeap::new(region.start(), region.end()) };

        let address = heap.heap_alloc(size).unwrap().as_ptr() as usize;
        let (pool_start, pool_end) = heap.pool_bounds();
        prop_assert!(address >= pool_start && address < pool_end);
        prop_assert_eq!((address - pool_start) % BYTES_PER_BLOCK, 0);

        let head = (address - pool_start) / BYTES_PER_BLOCK;
        let blocks = size.div_ceil(BYTES_PER_BLOCK);
        prop_assert_eq!(heap.block_state(head), BlockState::Head);
        for tail in 1..blocks {
            prop_assert_eq!(heap.block_state(head + tail), BlockState::Tail);
        }
        if head + blocks < heap.num_blocks() {
            prop_assert_eq!(heap.block_state(head + blocks), BlockState::Free);
        }
    }

    /// Allocations never hand out overlapping memory.
    #[test]
    fn allocations_are_disjoint(sizes in prop::collection::vec(object_size(), 1..8)) {
        let region = TestRegion::new(128 * BYTES_PER_BLOCK);
        let mut heap = unsafe { GcHeap::new(region.start(), region.end()) };

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for size in sizes {
            if let Some(object) = heap.heap_alloc(size) {
                let start = object.as_ptr() as usize;
                ranges.push((start, start + size));
            }
        }
        for (index, &(start, end)) in ranges.iter().enumerate() {
            for &(other_start, other_end) in &ranges[index + 1..] {
                prop_assert!(end <= other_start || other_end <= start);
            }
        }
    }

    /// A collection with no roots returns the heap to its initial state, and
    /// no block is ever left marked after a sweep.
    #[test]
    fn unrooted_heaps_collect_to_empty(sizes in prop::collection::vec(object_size(), 1..8)) {
        let region = TestRegion::new(128 * BYTES_PER_BLOCK);
        let mut heap = unsafe { GcHeap::new(region.start(), region.end()) };

        for size in sizes {
            let _ = heap.heap_alloc(size);
        }
        heap.collect(&RootRegions::empty());

        prop_assert_eq!(heap.free_blocks(), heap.num_blocks());
        for index in 0..heap.num_blocks() {
            prop_assert_ne!(heap.block_state(index), BlockState::Mark);
        }
    }

    /// Allocating through the collecting path always succeeds while nothing
    /// is rooted, regardless of the allocation history.
    #[test]
    fn collecting_allocation_never_exhausts_an_unrooted_heap(
        sizes in prop::collection::vec(1usize..=4 * BYTES_PER_BLOCK, 1..32),
    ) {
        let region = TestRegion::new(16 * BYTES_PER_BLOCK);
        let mut heap = unsafe { GcHeap::new(region.start(), region.end()) };

        for size in sizes {
            prop_assert!(heap.alloc(size, &RootRegions::empty()).is_some());
        }
    }
}
