//! Benchmarks for the k-way merge of per-partition results.
//!
//! Run with: cargo bench --bench aggregate_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rls_ann_bench::{aggregate, CandidateResult, PartitionId, RecordId};

fn lists(partitions: usize, per_partition: usize) -> Vec<Vec<CandidateResult>> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    (0..partitions)
        .map(|p| {
            let mut list: Vec<CandidateResult> = (0..per_partition)
                .map(|i| {
                    let id = (i * partitions + p) as u64;
                    CandidateResult::new(RecordId(id), rng.gen_range(0.0..10.0), PartitionId(p as u32))
                })
                .collect();
            list.sort_by(|a, b| a.rank_cmp(b));
            list
        })
        .collect()
}

fn benchmark_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    for partitions in [1, 4, 16, 64] {
        let input = lists(partitions, 100);
        for k in [10, 100] {
            group.bench_with_input(
                BenchmarkId::new(format!("k{}", k), partitions),
                &input,
                |b, input| b.iter(|| aggregate(black_box(input), black_box(k))),
            );
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_aggregate);
criterion_main!(benches);
