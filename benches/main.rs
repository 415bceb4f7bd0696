use criterion::criterion_main;

mod bench_query;

// Main entry point for running the benchmarks
criterion_main!(bench_build::benches, bench_query::benches);
