use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

use lattice_pathdb::prelude::*;

fn grow(parallelism: usize, max_d: i32) -> usize {
    let store = Arc::new(MemoryStore::new());
    let env = PathEnv::new(store, Arc::new(AlternatingTrioOracle))
        .with_pool(Arc::new(NodePool::new()))
        .with_config(PathConfig {
            parallelism,
            sync_backoff_ms: 0,
            ..PathConfig::default()
        });
    let mut ctx = PathContext::create(&env, GrowthContext::new(1, 8, 0), 0).expect("context");
    ctx.init_root_node(Point::ORIGIN).expect("root");
    ctx.request_new_max_dist(max_d).expect("advance");
    ctx.count_all_path_nodes().expect("count")
}

fn bench_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("advance");
    group.sample_size(20);

    for &parallelism in &[1usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::new("grow_to_d40", parallelism),
            &parallelism,
            |b, &par| {
                b.iter(|| black_box(grow(par, 40)));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_advance);
criterion_main!(benches);
