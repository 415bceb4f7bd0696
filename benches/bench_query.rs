use shared::*;

use criterion::{black_box, criterion_group, Criterion};
use kdforest::distance::Distance;
use kdforest::forest::KdForest;
use kdforest::search::Neighbor;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Configures Criterion using the shared benchmark timeout.
fn configure_criterion() -> Criterion {
    Criterion::default().measurement_time(BENCH_TIMEOUT)
}

fn benchmark_query_exact(_c: &mut Criterion) {
    let data = bench_data();
    let query = bench_query_point();
    let mut forest = KdForest::new(BENCH_DIMENSION, BENCH_NUM_TREES, Distance::L2).unwrap();
    forest
        .build_with_rng(&data, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let mut searcher = forest.new_searcher().unwrap();

    let mut cc = configure_criterion();
    cc.bench_function("query_exact", |b| {
        b.iter(|| {
            let mut neighbors = [Neighbor::default(); BENCH_K];
            let comparisons = searcher.query(&mut neighbors, &query).unwrap();
            black_box((neighbors[0], comparisons))
        })
    });
}

fn benchmark_query_budgeted(_c: &mut Criterion) {
    let data = bench_data();
    let query = bench_query_point();
    let mut forest = KdForest::new(BENCH_DIMENSION, BENCH_NUM_TREES, Distance::L2).unwrap();
    forest.set_max_num_comparisons(500);
    forest
        .build_with_rng(&data, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let mut searcher = forest.new_searcher().unwrap();

    let mut cc = configure_criterion();
    cc.bench_function("query_budget_500", |b| {
        b.iter(|| {
            let mut neighbors = [Neighbor::default(); BENCH_K];
            let comparisons = searcher.query(&mut neighbors, &query).unwrap();
            black_box((neighbors[0], comparisons))
        })
    });
}

fn benchmark_query_l1(_c: &mut Criterion) {
    let data = bench_data();
    let query = bench_query_point();
    let mut forest = KdForest::new(BENCH_DIMENSION, BENCH_NUM_TREES, Distance::L1).unwrap();
    forest
        .build_with_rng(&data, &mut StdRng::seed_from_u64(1))
        .unwrap();
    let mut searcher = forest.new_searcher().unwrap();

    let mut cc = configure_criterion();
    cc.bench_function("query_exact_l1", |b| {
        b.iter(|| {
            let mut neighbors = [Neighbor::default(); BENCH_K];
            let comparisons = searcher.query(&mut neighbors, &query).unwrap();
            black_box((neighbors[0], comparisons))
        })
    });
}

criterion_group!(
    benches,
    benchmark_query_exact,
    benchmark_query_budgeted,
    benchmark_query_l1
);
