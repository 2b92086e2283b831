//! # Allocator Benchmark
//!
//! Measures allocate/free round trips for every primitive strategy and the
//! overhead the expandable arena's lock and bookkeeping add on top.

#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oroboros_alloc::{
    Allocator, BitmapAllocator, BuddyAllocator, ExpandableArena, FitPolicy, FreeListAllocator,
    HeapAllocator, LinearAllocator, PoolAllocator, PoolConfig, StackAllocator,
};

const BATCH: usize = 1_000;

/// Allocates a batch, then frees it in reverse order.
fn churn<A: Allocator>(allocator: &A, size: usize) {
    let mut handles = Vec::with_capacity(BATCH);
    for _ in 0..BATCH {
        handles.push(allocator.allocate(size, 8));
    }
    while let Some(handle) = handles.pop() {
        allocator.deallocate(black_box(handle));
    }
}

fn bench_primitives(c: &mut Criterion) {
    let mut group = c.benchmark_group("primitive_churn_64B");

    let heap = HeapAllocator::new();
    group.bench_function("heap", |b| b.iter(|| churn(&heap, 64)));

    let stack = StackAllocator::new(64 * BATCH).unwrap();
    group.bench_function("stack", |b| b.iter(|| churn(&stack, 64)));

    let pool = PoolAllocator::new(64, BATCH).unwrap();
    group.bench_function("pool", |b| b.iter(|| churn(&pool, 64)));

    let bitmap = BitmapAllocator::new(64, BATCH).unwrap();
    group.bench_function("bitmap", |b| b.iter(|| churn(&bitmap, 64)));

    let buddy = BuddyAllocator::new((64 * BATCH).next_power_of_two(), 64).unwrap();
    group.bench_function("buddy", |b| b.iter(|| churn(&buddy, 64)));

    let free_list = FreeListAllocator::new(64 * BATCH, FitPolicy::FirstFit).unwrap();
    group.bench_function("free_list", |b| b.iter(|| churn(&free_list, 64)));

    group.finish();
}

fn bench_linear_reset(c: &mut Criterion) {
    let linear = LinearAllocator::new(64 * BATCH).unwrap();
    c.bench_function("linear_fill_and_reset", |b| {
        b.iter(|| {
            for _ in 0..BATCH {
                let _ = black_box(linear.allocate(64, 8));
            }
            linear.reset();
        });
    });
}

fn bench_expandable_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("expandable_pool");

    for instances in [1usize, 4, 16] {
        let arena = ExpandableArena::<PoolAllocator>::new(
            Arc::new(HeapAllocator::new()),
            PoolConfig {
                block_size: 64,
                block_count: BATCH / instances,
            },
        )
        .unwrap();
        // Pre-grow so the measurement excludes region acquisition
        churn(&arena, 64);

        group.bench_with_input(BenchmarkId::from_parameter(instances), &arena, |b, arena| {
            b.iter(|| churn(arena, 64));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_primitives,
    bench_linear_reset,
    bench_expandable_pool
);
criterion_main!(benches);
