//! Matrix Multiplication Benchmark Comparison
//!
//! Compares the naive, cache-blocked naive, Strassen and reference products
//! across matrix sizes, sequentially and on a thread pool.
//!
//! # Usage:
//! ```bash
//! # Run all matrix multiplication benchmarks
//! cargo bench --bench matmul
//!
//! # Run one size
//! cargo bench --bench matmul -- matmul_256
//! ```

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use densemm::algorithms::{naive, reference, strassen};
use densemm::{Matrix, Optimization};

fn random_pair(n: usize) -> (Matrix, Matrix) {
    let mut rng = StdRng::seed_from_u64(42);
    let a = Matrix::random(n, -1.0..1.0, &mut rng);
    let b = Matrix::random(n, -1.0..1.0, &mut rng);
    (a, b)
}

/// One group per size, every implementation inside it.
fn bench_sequential_by_size(c: &mut Criterion) {
    for n in [64, 128, 256, 512] {
        let mut group = c.benchmark_group(format!("matmul_{n}"));
        group.sample_size(20);

        let (a, b) = random_pair(n);
        let plain = Optimization::default();
        let blocked = Optimization::blocked(64);

        group.bench_function("naive", |bench| {
            bench.iter(|| naive::sequential(black_box(&a), black_box(&b), &plain))
        });
        group.bench_function("naive_blocked", |bench| {
            bench.iter(|| naive::sequential(black_box(&a), black_box(&b), &blocked))
        });
        group.bench_function("strassen", |bench| {
            bench.iter(|| strassen::sequential(black_box(&a), black_box(&b)))
        });
        group.bench_function("reference", |bench| {
            bench.iter(|| reference::multiply(black_box(&a), black_box(&b)))
        });

        group.finish();
    }
}

/// Thread scaling at a fixed size.
fn bench_shared_memory_threads(c: &mut Criterion) {
    let n = 512;
    let (a, b) = random_pair(n);
    let blocked = Optimization::blocked(64);
    let max_threads = std::thread::available_parallelism().map_or(4, |p| p.get());

    let mut group = c.benchmark_group(format!("shared_memory_{n}"));
    group.sample_size(10);

    let mut threads = 1;
    while threads <= max_threads {
        group.bench_with_input(BenchmarkId::new("naive_blocked", threads), &threads, |bench, &t| {
            bench.iter(|| naive::shared_memory(black_box(&a), black_box(&b), &blocked, t))
        });
        group.bench_with_input(BenchmarkId::new("strassen", threads), &threads, |bench, &t| {
            bench.iter(|| strassen::shared_memory(black_box(&a), black_box(&b), t))
        });
        threads *= 2;
    }

    group.finish();
}

criterion_group!(benches, bench_sequential_by_size, bench_shared_memory_threads);
criterion_main!(benches);
