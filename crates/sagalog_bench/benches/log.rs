//! Saga log and pool benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use sagalog_bench::saga_execution;
use sagalog_core::{SagaLog, SagaLogId, SagaLogOwner, SagaLogPool};
use sagalog_storage::{FileBackend, InMemoryBackend};
use tempfile::TempDir;

fn memory_log() -> SagaLog {
    let id = SagaLogId::new("/bench", "01", "bench").unwrap();
    SagaLog::open(id, Box::new(InMemoryBackend::new())).unwrap()
}

/// Benchmark single entry writes.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");

    group.bench_function("inmemory", |b| {
        let log = memory_log();
        b.iter(|| {
            let entry = log
                .write(log.builder().start_action("ex-1", "action1"))
                .unwrap();
            black_box(entry);
        });
    });

    group.sample_size(20);
    group.bench_function("file", |b| {
        let temp_dir = TempDir::new().unwrap();
        let id = SagaLogId::new(temp_dir.path(), "01", "bench").unwrap();
        let log = SagaLog::open(id.clone(), Box::new(FileBackend::open(&id.path()).unwrap()))
            .unwrap();
        b.iter(|| {
            let entry = log
                .write(log.builder().start_action("ex-1", "action1"))
                .unwrap();
            black_box(entry);
        });
        log.close().unwrap();
    });

    group.finish();
}

/// Benchmark a whole execution lifecycle: write every entry, then truncate.
fn bench_saga_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("saga_lifecycle");

    for actions in [1, 4, 16].iter() {
        group.throughput(Throughput::Elements((*actions * 2 + 2) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(actions), actions, |b, &actions| {
            let log = memory_log();
            let mut n = 0u64;

            b.iter(|| {
                let execution_id = format!("ex-{n}");
                n += 1;
                let mut last = None;
                for builder in saga_execution(&execution_id, actions, 64) {
                    last = Some(log.write(builder).unwrap().id());
                }
                if let Some(id) = last {
                    log.truncate(id).unwrap();
                }
            });
        });
    }

    group.finish();
}

/// Benchmark recovery reads over a log holding many executions.
fn bench_read_incomplete(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_incomplete_sagas");

    for executions in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*executions as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(executions),
            executions,
            |b, &executions| {
                let log = memory_log();
                for i in 0..executions {
                    for builder in saga_execution(&format!("ex-{i}"), 2, 64) {
                        log.write(builder).unwrap();
                    }
                }

                b.iter(|| {
                    let entries = log.read_incomplete_sagas().unwrap();
                    black_box(entries);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark reading one execution back by id.
fn bench_read_entries(c: &mut Criterion) {
    c.bench_function("read_entries_of_1000", |b| {
        let log = memory_log();
        for i in 0..1000 {
            for builder in saga_execution(&format!("ex-{i}"), 2, 64) {
                log.write(builder).unwrap();
            }
        }
        let mut rng = rand::thread_rng();

        b.iter(|| {
            let execution_id = format!("ex-{}", rng.gen_range(0..1000));
            let entries = log.read_entries(black_box(&execution_id)).unwrap();
            black_box(entries);
        });
    });
}

/// Benchmark pool connect and acquire on already-open logs.
fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    let pool = SagaLogPool::in_memory("01");
    let ids: Vec<_> = (0..64)
        .map(|i| {
            let id = pool.register_instance_local_id_for(&format!("l{i}")).unwrap();
            pool.connect(&id).unwrap();
            id
        })
        .collect();

    group.bench_function("connect_open", |b| {
        let mut idx = 0;
        b.iter(|| {
            let log = pool.connect(black_box(&ids[idx % ids.len()])).unwrap();
            idx += 1;
            black_box(log);
        });
    });

    group.bench_function("acquire_release", |b| {
        let owner = SagaLogOwner::new("bench");
        let mut idx = 0;
        b.iter(|| {
            let id = &ids[idx % ids.len()];
            idx += 1;
            black_box(pool.acquire(&owner, id).unwrap());
            pool.release(id);
        });
    });

    group.finish();
    pool.shutdown().unwrap();
}

criterion_group!(
    benches,
    bench_write,
    bench_saga_lifecycle,
    bench_read_incomplete,
    bench_read_entries,
    bench_pool,
);

criterion_main!(benches);
