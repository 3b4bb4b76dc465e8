use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pgloadgen::workload::{self, MaxIdCache};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("workload_select");

    group.bench_function("select_known_max_id", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| {
            let draw: f64 = rng.r#gen();
            black_box(workload::select(draw, Some(1_000_000), &mut rng))
        });
    });

    // Updates short-circuit to a skip here, reads pin to row 1.
    group.bench_function("select_unknown_max_id", |b| {
        let mut rng = StdRng::seed_from_u64(2);
        b.iter(|| {
            let draw: f64 = rng.r#gen();
            black_box(workload::select(draw, None, &mut rng))
        });
    });

    group.finish();
}

fn bench_max_id_cache(c: &mut Criterion) {
    let cache = MaxIdCache::new();
    let mut next = 0_i64;
    c.bench_function("max_id_cache_set_get", |b| {
        b.iter(|| {
            next += 1;
            cache.set(next);
            black_box(cache.get())
        });
    });
}

criterion_group!(benches, bench_select, bench_max_id_cache);
criterion_main!(benches);
