// Benchmarks for LockRegistry reservation paths
// Measures conflict checks and grant/release cycles across member fan-out widths

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ddlock_api::{LockEntry, LockMode, MemberId, ObjectId, OwnerId};
use ddlock_consistency::LockRegistry;

fn members(count: usize) -> Vec<MemberId> {
    (0..count).map(|i| MemberId::new(format!("ts-{}", i))).collect()
}

fn bench_reserve_release_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("reserve_release_cycle");
    for width in [1usize, 3, 10, 50] {
        let registry = LockRegistry::new();
        let targets = members(width);
        let entries = vec![LockEntry::new(
            ObjectId::new(16384, 16390),
            LockMode::Exclusive,
            OwnerId::new("s1"),
        )];
        let owner = OwnerId::new("s1");

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, _| {
            b.iter(|| {
                let reserved = registry.reserve_all(&targets, &entries).unwrap();
                for member in &targets {
                    registry.mark_granted(member, &entries);
                }
                registry.begin_release(&owner, &[]);
                for member in &targets {
                    registry.complete_release(member, &owner, &[]);
                }
                black_box(reserved)
            })
        });
    }
    group.finish();
}

fn bench_conflict_check(c: &mut Criterion) {
    let registry = LockRegistry::new();
    let targets = members(10);
    for object in 0..1_000u32 {
        let held = LockEntry::new(
            ObjectId::new(16384, object),
            LockMode::Shared,
            OwnerId::new("reader"),
        );
        for member in &targets {
            registry.upsert(member, std::slice::from_ref(&held));
        }
    }
    let conflicting = vec![LockEntry::new(
        ObjectId::new(16384, 999),
        LockMode::Exclusive,
        OwnerId::new("writer"),
    )];

    c.bench_function("conflict_check_1000_entries", |b| {
        b.iter(|| black_box(registry.reserve_all(&targets, &conflicting).is_err()))
    });
}

criterion_group!(benches, bench_reserve_release_cycle, bench_conflict_check);
criterion_main!(benches);
