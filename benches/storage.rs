//! Benchmarks for the in-memory storage backend.
//!
//! Measures task creation, status-filtered unit listing and the progress
//! rollup that runs after every unit completion.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use secdet::core::case::{Case, RiskLevel, SortOrder};
use secdet::execution::ProgressAggregator;
use secdet::{CaseId, InMemoryStorage, Storage, TargetAddr, Task, UnitStatus, UserId};
use std::sync::Arc;
use tokio::runtime::Runtime;

async fn seed_cases(storage: &InMemoryStorage, count: usize) -> Vec<CaseId> {
    let category = storage
        .save_category("bench", SortOrder::Unset)
        .await
        .unwrap();
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let case = Case::new(
            format!("case_{}", i),
            category.id,
            RiskLevel::Low,
            format!("case_{}.sh", i),
        );
        ids.push(storage.save_case(case).await.unwrap().id);
    }
    ids
}

fn new_task(total: usize) -> Task {
    Task::new(
        TargetAddr::parse("10.0.0.1").unwrap(),
        UserId::new(1),
        total as u32,
    )
}

fn bench_create_task(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("storage_create_task");

    for size in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("inmemory", size), size, |b, &size| {
            let storage = InMemoryStorage::new();
            let cases = rt.block_on(seed_cases(&storage, size));

            b.iter(|| {
                rt.block_on(async { storage.create_task(new_task(size), &cases).await.unwrap() })
            });
        });
    }

    group.finish();
}

fn bench_list_units_with_status(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("storage_list_pending_units");

    for size in [100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("inmemory", size), size, |b, &size| {
            let storage = InMemoryStorage::new();
            let task_id = rt.block_on(async {
                let cases = seed_cases(&storage, size).await;
                // Background tasks the filter has to skip.
                for _ in 0..10 {
                    storage.create_task(new_task(size), &cases).await.unwrap();
                }
                storage.create_task(new_task(size), &cases).await.unwrap().0.id
            });

            b.iter(|| {
                rt.block_on(async {
                    storage
                        .list_units_with_status(task_id, &[UnitStatus::Pending])
                        .await
                        .unwrap()
                })
            });
        });
    }

    group.finish();
}

fn bench_recompute(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("progress_recompute");

    for size in [100, 500].iter() {
        group.bench_with_input(BenchmarkId::new("inmemory", size), size, |b, &size| {
            let storage = Arc::new(InMemoryStorage::new());
            let progress = ProgressAggregator::new(storage.clone());
            let task_id = rt.block_on(async {
                let cases = seed_cases(&storage, size).await;
                storage.create_task(new_task(size), &cases).await.unwrap().0.id
            });

            b.iter(|| rt.block_on(async { progress.recompute(task_id).await.unwrap() }));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_create_task,
    bench_list_units_with_status,
    bench_recompute
);
criterion_main!(benches);
