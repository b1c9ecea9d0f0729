//! Benchmarks for pool placement and tag classification
//!
//! Target: placement over 1K pools well under 100µs

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sds_controller::controlplane::{PlacementScheduler, PolicyEngine};
use sds_controller::domain::model::{LifecycleStage, Pool, TagMap};
use std::collections::BTreeSet;

fn tag_map(pairs: &[(&str, &str)]) -> TagMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn inventory(pools: usize, docks: usize) -> (Vec<Pool>, BTreeSet<String>) {
    let mut out = Vec::with_capacity(pools);
    for i in 0..pools {
        let tags = if i % 3 == 0 {
            tag_map(&[("thinProvision", "true")])
        } else {
            TagMap::new()
        };
        out.push(Pool {
            id: format!("pool-{:05}", i),
            name: format!("pool-{:05}", i),
            dock_id: format!("dock-{:03}", i % docks),
            availability_zone: if i % 2 == 0 { "az-1" } else { "az-2" }.to_string(),
            total_capacity_gib: 1024,
            free_capacity_gib: (i as u64 * 37) % 1024,
            tags,
        });
    }
    // Every fourth dock is down
    let available = (0..docks)
        .filter(|d| d % 4 != 0)
        .map(|d| format!("dock-{:03}", d))
        .collect();
    (out, available)
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("placement");
    let wanted = tag_map(&[("thinProvision", "true")]);

    for pools in [100usize, 1_000, 10_000] {
        let (inventory, available) = inventory(pools, 64);
        group.throughput(Throughput::Elements(pools as u64));

        group.bench_with_input(BenchmarkId::new("select_untagged", pools), &pools, |b, _| {
            b.iter(|| {
                PlacementScheduler::select(
                    black_box(&inventory),
                    &available,
                    &TagMap::new(),
                    black_box(64),
                    None,
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("select_tagged_az", pools), &pools, |b, _| {
            b.iter(|| {
                PlacementScheduler::select(
                    black_box(&inventory),
                    &available,
                    &wanted,
                    black_box(64),
                    Some("az-1"),
                )
            });
        });
    }

    group.finish();
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy");
    group.throughput(Throughput::Elements(1));

    let engine = PolicyEngine::default();
    let tags = tag_map(&[
        ("thinProvision", "true"),
        ("highAvailability", "true"),
        ("intervalSnapshot", "1h"),
        ("deleteSnapshotPolicy", "true"),
    ]);

    group.bench_function("classify_create", |b| {
        b.iter(|| engine.classify(black_box(&tags), LifecycleStage::Create));
    });

    group.bench_function("classify_delete", |b| {
        b.iter(|| engine.classify(black_box(&tags), LifecycleStage::Delete));
    });

    group.finish();
}

criterion_group!(benches, bench_select, bench_classify);
criterion_main!(benches);
