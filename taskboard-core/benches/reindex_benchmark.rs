use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use taskboard_core::reindex::{self, Placement};
use uuid::Uuid;

fn scope(n: u32) -> Vec<Placement> {
    (0..n).map(|i| Placement::new(Uuid::new_v4(), i)).collect()
}

fn bench_reorder(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reindex");
    group.throughput(Throughput::Elements(1));

    let siblings = scope(500);
    let first = siblings[0].id;

    group.bench_function("reorder_front_to_back_500", |b| {
        b.iter(|| {
            let shifts = reindex::reorder(black_box(&siblings), first, 499).unwrap();
            black_box(shifts);
        })
    });

    group.bench_function("remove_front_500", |b| {
        b.iter(|| {
            let shifts = reindex::remove(black_box(&siblings), first).unwrap();
            black_box(shifts);
        })
    });

    group.finish();
}

fn bench_compact(c: &mut Criterion) {
    let mut group = c.benchmark_group("Reindex");

    // Every other index duplicated: worst case for the repair pass
    let broken: Vec<Placement> = (0..500u32)
        .map(|i| Placement::new(Uuid::new_v4(), i / 2))
        .collect();

    group.bench_function("compact_500_duplicates", |b| {
        b.iter(|| {
            let shifts = reindex::compact(black_box(&broken));
            black_box(shifts);
        })
    });

    group.bench_function("is_contiguous_500", |b| {
        let intact = scope(500);
        b.iter(|| black_box(reindex::is_contiguous(black_box(&intact))))
    });

    group.finish();
}

criterion_group!(benches, bench_reorder, bench_compact);
criterion_main!(benches);
