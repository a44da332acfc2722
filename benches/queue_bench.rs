//! Heap operation benchmarks.
//!
//! Covers the operations the scheduler leans on hardest:
//! - insert throughput at several queue sizes
//! - drain (repeated poll) throughput
//! - priority decrease (cut + link) and increase (remove + reinsert)
//! - mixed insert/poll steady state

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tempoq::{PairingHeap, PriorityQueue, Ref};

fn filled(n: u64) -> PairingHeap<u64, u64> {
    let mut heap = PairingHeap::with_capacity(n as usize);
    for i in 0..n {
        // Scatter priorities so the tree shape is not degenerate.
        let priority = (i * 2_654_435_761) % 1_000_003;
        heap.insert(priority, i, None).expect("insert");
    }
    heap
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    for size in [100u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |mut heap| {
                    heap.insert(black_box(size / 2), u64::MAX, None).expect("insert");
                    heap
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain");
    for size in [100u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || filled(size),
                |mut heap| {
                    while let Some(entry) = heap.poll() {
                        black_box(entry.priority);
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_set_priority(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_priority");
    group.bench_function("decrease", |b| {
        b.iter_batched(
            || filled(1_000),
            |mut heap| {
                heap.set_priority(Ref::Payload(&500u64), 0).expect("decrease");
                heap
            },
            BatchSize::SmallInput,
        );
    });
    group.bench_function("increase", |b| {
        b.iter_batched(
            || filled(1_000),
            |mut heap| {
                heap.set_priority(Ref::Payload(&500u64), 2_000_000)
                    .expect("increase");
                heap
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_mixed(c: &mut Criterion) {
    c.bench_function("mixed_insert_poll", |b| {
        b.iter_batched(
            || filled(1_000),
            |mut heap| {
                for i in 0..100u64 {
                    heap.insert((i * 97) % 1_000_003, 1_000_000 + i, None)
                        .expect("insert");
                    black_box(heap.poll());
                }
                heap
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_insert,
    bench_drain,
    bench_set_priority,
    bench_mixed
);
criterion_main!(benches);
