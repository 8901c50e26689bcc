use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use pipewright::prelude::*;

fn bench_channel_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("channel_handoff");

    for size in [100u64, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size));

        for capacity in [0usize, 16] {
            let label = if capacity == 0 { "rendezvous" } else { "bounded16" };
            group.bench_with_input(BenchmarkId::new(label, size), size, |b, &size| {
                b.iter(|| {
                    tokio::runtime::Runtime::new().unwrap().block_on(async {
                        let channel = Channel::new(capacity);
                        let writer = channel.writer();
                        let reader = channel.reader();

                        let producer = tokio::spawn(async move {
                            for i in 0..size {
                                writer.write(black_box(i)).await.unwrap();
                            }
                        });
                        while let Ok(value) = reader.read().await {
                            black_box(value);
                        }
                        producer.await.unwrap();
                    })
                });
            });
        }
    }

    group.finish();
}

fn bench_delta_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_fan_out");

    for size in [100u64, 1000].iter() {
        group.throughput(Throughput::Elements(*size));

        group.bench_with_input(BenchmarkId::new("delta", size), size, |b, &size| {
            b.iter(|| {
                tokio::runtime::Runtime::new().unwrap().block_on(async {
                    let input = Channel::bounded(16);
                    let (mut delta, left, right) = Delta::with_outputs(&input);
                    let left = left.reader();
                    let right = right.reader();
                    let writer = input.writer();

                    let fan_out = tokio::spawn(async move { delta.run().await });
                    let drain_left = tokio::spawn(async move { while left.read().await.is_ok() {} });
                    let drain_right = tokio::spawn(async move { while right.read().await.is_ok() {} });

                    for i in 0..size {
                        writer.write(i).await.unwrap();
                    }
                    drop(writer);

                    fan_out.await.unwrap().unwrap();
                    drain_left.await.unwrap();
                    drain_right.await.unwrap();
                })
            });
        });
    }

    group.finish();
}

fn bench_queue_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_dispatch");

    for workers in [1usize, 4].iter() {
        group.bench_with_input(
            BenchmarkId::new("noop_processes", workers),
            workers,
            |b, &workers| {
                b.iter(|| {
                    tokio::runtime::Runtime::new().unwrap().block_on(async {
                        let queue = ProcessQueue::new(QueueConfig::default().max_workers(workers));
                        for i in 0..1000 {
                            queue
                                .enqueue(process_from_fn(format!("noop-{i}"), || async { Ok(()) }))
                                .await
                                .unwrap();
                        }
                        queue.shutdown();
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_channel_handoff,
    bench_delta_fan_out,
    bench_queue_dispatch
);
criterion_main!(benches);
