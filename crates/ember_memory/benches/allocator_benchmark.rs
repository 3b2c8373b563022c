//! # Allocator Benchmark
//!
//! Measures the per-frame cost of each allocator:
//! 1. Stack bump allocation and O(1) reset
//! 2. Free-list allocate/free churn
//! 3. Arena compaction after heavy fragmentation

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use ember_memory::{FreeListAllocator, MemoryArena, MemoryConfig, MemoryManager, StackAllocator};

const OBJECT_COUNT: usize = 10_000;

/// Deterministic "random" indices
fn generate_indices(count: usize, max: usize, seed: u64) -> Vec<usize> {
    let mut state = seed;
    (0..count)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as usize) % max
        })
        .collect()
}

// =============================================================================
// STACK
// =============================================================================

fn bench_stack_bump(c: &mut Criterion) {
    let mut stack = StackAllocator::new(OBJECT_COUNT * 80).unwrap();

    c.bench_function("stack_alloc_10k_then_clear", |b| {
        b.iter(|| {
            for i in 0..OBJECT_COUNT {
                let _ = black_box(stack.alloc(16 + i % 48, 16).unwrap());
            }
            stack.clear();
        });
    });
}

// =============================================================================
// FREE LIST
// =============================================================================

fn bench_free_list_churn(c: &mut Criterion) {
    let mut heap = FreeListAllocator::new(OBJECT_COUNT * 128).unwrap();
    let order = generate_indices(OBJECT_COUNT, OBJECT_COUNT, 0x5EED);

    c.bench_function("free_list_alloc_free_10k_random_order", |b| {
        b.iter(|| {
            let mut blocks: Vec<_> = (0..OBJECT_COUNT)
                .map(|i| Some(heap.alloc(8 + i % 56, 8).unwrap()))
                .collect();
            for &index in &order {
                if let Some(block) = blocks[index].take() {
                    heap.free(block).unwrap();
                }
            }
            for block in blocks.into_iter().flatten() {
                heap.free(block).unwrap();
            }
            black_box(heap.free_range_count())
        });
    });
}

// =============================================================================
// ARENA
// =============================================================================

fn fragmented_arena() -> MemoryArena {
    let mut arena = MemoryArena::new(OBJECT_COUNT * 32).unwrap();
    let handles: Vec<_> = (0..OBJECT_COUNT)
        .map(|i| arena.new_dynamic([i as u64; 4]).unwrap())
        .collect();
    for handle in handles.into_iter().step_by(2) {
        arena.delete_dynamic(handle).unwrap();
    }
    arena
}

fn bench_arena_defragment(c: &mut Criterion) {
    c.bench_function("arena_defragment_10k_half_free", |b| {
        b.iter_batched(
            fragmented_arena,
            |mut arena| black_box(arena.defragment()),
            BatchSize::LargeInput,
        );
    });
}

fn bench_manager_frame(c: &mut Criterion) {
    let mut memory = MemoryManager::new();
    memory.start_up(&MemoryConfig::uniform(4 * 1024 * 1024)).unwrap();
    memory.finish_engine_startup_listener().unwrap();

    c.bench_function("manager_frame_1k_scratch", |b| {
        b.iter(|| {
            for i in 0..1000_u32 {
                let _ = black_box(memory.new_on_single_frame([i; 8]).unwrap());
                let _ = black_box(memory.new_on_double_buffered(i).unwrap());
            }
            memory.update().unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_stack_bump,
    bench_free_list_churn,
    bench_arena_defragment,
    bench_manager_frame,
);
criterion_main!(benches);
