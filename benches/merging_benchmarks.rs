/// Performance benchmarks for merging operations
///
/// Run with: cargo bench
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use svmerge::config::{MergeConfig, MergeMode};
use svmerge::kd_tree::KdTree;
use svmerge::merger::merge_partition;
use svmerge::scheduler::PartitionScheduler;
use svmerge::variant::{Norm, VariantRecord};

/// Synthetic partition of calls clustered around shared loci
fn generate_partition(key: &str, num_records: usize, seed: u64) -> Vec<VariantRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let loci: Vec<(f64, f64)> = (0..(num_records / 20).max(1))
        .map(|_| (rng.gen_range(0.0..1e6), rng.gen_range(50.0..5000.0)))
        .collect();

    (0..num_records)
        .map(|i| {
            let (start, length) = loci[rng.gen_range(0..loci.len())];
            VariantRecord::new(
                rng.gen_range(0..50),
                format!("{key}_{i}"),
                start + rng.gen_range(-200.0..200.0),
                length + rng.gen_range(-200.0..200.0),
                key,
            )
            .with_max_distance(500.0)
        })
        .collect()
}

/// Benchmark: exact k-nearest-neighbor queries
fn bench_knn_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("knn");

    for size in [1_000, 10_000, 100_000].iter() {
        let records = generate_partition("chr1_DEL", *size, 1);
        let tree = KdTree::build(&records, Norm::euclidean());
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut next = 0;
            b.iter(|| {
                next = (next + 7919) % size;
                black_box(tree.k_nearest_to(next, 16))
            });
        });
    }

    group.finish();
}

/// Benchmark: one partition through each merge mode
fn bench_merge_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_partition");
    group.sample_size(10);

    for size in [1_000, 10_000].iter() {
        let records = generate_partition("chr1_DEL", *size, 2);
        group.throughput(Throughput::Elements(*size as u64));
        for mode in [MergeMode::Default, MergeMode::Clique, MergeMode::Centroid] {
            let config = MergeConfig::default().with_mode(mode);
            group.bench_with_input(BenchmarkId::new(mode.to_string(), size), &records, |b, records| {
                b.iter(|| merge_partition(black_box(records), &config).unwrap());
            });
        }
    }

    group.finish();
}

/// Benchmark: many partitions across worker threads
fn bench_scheduler(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler");
    group.sample_size(10);

    let partitions: BTreeMap<String, Vec<VariantRecord>> = (0..24)
        .map(|i| {
            let key = format!("chr{}_DEL", i + 1);
            let records = generate_partition(&key, 2_000, i as u64);
            (key, records)
        })
        .collect();

    for threads in [1, 4, 8].iter() {
        let config = MergeConfig::default().with_threads(*threads);
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, _| {
            b.iter_with_setup(
                || partitions.clone(),
                |batch| PartitionScheduler::new(&config).unwrap().run(batch).unwrap(),
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_knn_queries, bench_merge_partition, bench_scheduler);
criterion_main!(benches);
