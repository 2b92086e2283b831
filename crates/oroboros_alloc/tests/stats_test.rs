//! Integration tests for usage statistics.

#![cfg(feature = "stats")]

use std::sync::Arc;

use oroboros_alloc::{
    AllocStats, Allocator, BitmapAllocator, BitmapConfig, ExpandableArena, FallbackArena,
    HeapAllocator, LinearAllocator, LinearConfig, MemoryHandle, Origin, StackAllocator,
    UsageCounters,
};

fn current(stats: &AllocStats, origin: Origin) -> (usize, usize) {
    let counters: &UsageCounters = stats.for_origin(origin);
    (counters.current_used, counters.current_overhead)
}

#[test]
fn test_stats_enabled() {
    assert!(AllocStats::enabled());
}

#[test]
fn test_round_trip_restores_every_allocator() {
    let allocators: Vec<Box<dyn Allocator>> = vec![
        Box::new(LinearAllocator::new(1024).unwrap()),
        Box::new(StackAllocator::new(1024).unwrap()),
        Box::new(BitmapAllocator::new(32, 32).unwrap()),
        Box::new(HeapAllocator::new()),
        Box::new(
            ExpandableArena::<BitmapAllocator>::new(
                Arc::new(HeapAllocator::new()),
                BitmapConfig {
                    block_size: 32,
                    block_count: 4,
                },
            )
            .unwrap(),
        ),
        Box::new(
            ExpandableArena::<LinearAllocator>::new(
                Arc::new(HeapAllocator::new()),
                LinearConfig { capacity: 1024 },
            )
            .unwrap(),
        ),
    ];

    for allocator in &allocators {
        // An odd-sized head leaves the next aligned request padded
        let head = allocator.allocate(1, 1);
        let before = allocator.stats();
        let handles: Vec<MemoryHandle> = [24, 100, 7]
            .into_iter()
            .map(|size| allocator.allocate(size, 8))
            .collect();
        assert_eq!(allocator.stats().payload.current_used, 132);

        for handle in handles.into_iter().rev() {
            allocator.deallocate(handle);
        }
        let after = allocator.stats();
        assert_eq!(current(&after, Origin::Payload), current(&before, Origin::Payload));
        assert_eq!(after.payload.peak_used, 132);
        allocator.deallocate(head);
    }
}

#[test]
fn test_backing_and_payload_are_separate() {
    let arena = ExpandableArena::<BitmapAllocator>::new(
        Arc::new(HeapAllocator::new()),
        BitmapConfig {
            block_size: 16,
            block_count: 8,
        },
    )
    .unwrap();

    let payload = arena.allocate(40, 8);
    let backing = arena.allocate_backing(16, 8);
    assert!(backing.is_backing());

    let stats = arena.stats();
    assert_eq!(current(&stats, Origin::Payload), (40, 8));
    assert_eq!(current(&stats, Origin::Backing), (16, 0));

    arena.deallocate(backing);
    arena.deallocate(payload);
    assert_eq!(arena.stats().total_used(), 0);
}

#[test]
fn test_heap_backing_counts_regions() {
    let heap = Arc::new(HeapAllocator::new());
    let arena = ExpandableArena::<BitmapAllocator>::new(
        heap.clone(),
        BitmapConfig {
            block_size: 64,
            block_count: 2,
        },
    )
    .unwrap();

    let a = arena.allocate(128, 8);
    let b = arena.allocate(128, 8);
    assert_eq!(heap.stats().backing.current_used, 256);
    assert_eq!(heap.stats().payload.current_used, 0);

    arena.deallocate(a);
    arena.deallocate(b);
    drop(arena);
    assert_eq!(heap.stats().backing.current_used, 0);
}

#[test]
fn test_fallback_combines_members() {
    let arena = FallbackArena::new(LinearAllocator::new(128).unwrap(), HeapAllocator::new());
    let a = arena.allocate(100, 4);
    let b = arena.allocate(100, 4);

    let combined = arena.stats();
    let primary = arena.primary().stats();
    let secondary = arena.secondary().stats();
    assert_eq!(combined, primary + secondary);
    assert_eq!(combined.payload.current_used, 200);

    arena.deallocate(b);
    arena.deallocate(a);
}
