//! Thread pool and backend throughput.
//!
//! - `submit_drain`: submit N no-op tasks, wait for all of them
//! - `task_queue`: offer/poll on one thread, no contention
//! - `backend_read`: N 64-byte reads through each backend

use std::sync::mpsc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use iochan_core::channel::share;
use iochan_core::executor::{spawn, ExecutorRef};
use iochan_core::io_backend::BackendRef;
use iochan_core::operation::{ChannelId, IoJob, Operation};
use iochan_core::shared::Shared;
use iochan_module::{MemoryReader, PoolBackend, ReactorBackend, TaskQueue, ThreadPool};

fn bench_submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");
    let pool = ThreadPool::new(4).unwrap();

    for &count in &[100u64, 1000, 10_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for i in 0..n {
                    let tx = tx.clone();
                    spawn(&pool, move || tx.send(black_box(i)).unwrap()).unwrap();
                }
                drop(tx);
                assert_eq!(rx.iter().count() as u64, n);
            });
        });
    }
    group.finish();
}

fn bench_task_queue(c: &mut Criterion) {
    let queue = TaskQueue::new();
    c.bench_function("task_queue/offer_poll", |b| {
        b.iter(|| {
            queue.offer(black_box(1u64));
            queue.try_poll()
        });
    });
}

fn bench_backend_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("backend_read");
    let n = 1000u64;
    group.throughput(Throughput::Elements(n));

    let executor: ExecutorRef = Shared::from_box(Box::new(ThreadPool::new(4).unwrap()));
    let backends: [BackendRef; 2] = [
        Shared::from_box(Box::new(PoolBackend::new(executor.clone()))),
        Shared::from_box(Box::new(ReactorBackend::start(executor.clone()).unwrap())),
    ];
    let channel = share(MemoryReader::new(vec![7u8; 64]));
    let id = ChannelId::next();

    for backend in &backends {
        group.bench_function(backend.name(), |b| {
            b.iter(|| {
                let (tx, rx) = mpsc::channel();
                for _ in 0..n {
                    let tx = tx.clone();
                    let op = Operation::read(id, Vec::new(), 64, Some(0)).unwrap();
                    let job = IoJob::new(op, channel.clone(), Box::new(move |c| tx.send(c.result).unwrap()));
                    backend.submit(job).unwrap();
                }
                drop(tx);
                assert_eq!(rx.iter().count() as u64, n);
            });
        });
    }
    group.finish();

    for backend in &backends {
        backend.shutdown();
    }
    executor.join();
}

criterion_group!(benches, bench_submit_drain, bench_task_queue, bench_backend_read);
criterion_main!(benches);
