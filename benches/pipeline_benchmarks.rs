//! Throughput benchmarks for the delivery pipeline.
//!
//! Uses the scripted transport so results measure queueing, batching, and
//! worker coordination rather than network latency.

#![allow(clippy::unwrap_used)]

use std::{
    hint::black_box,
    time::{Duration, Instant},
};

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use tokio::runtime::Runtime;
use tributary_delivery::{
    transport::mock::ScriptedTransport, BatchAccumulator, BoundedQueue, Pipeline, PipelineConfig,
};

const RECORDS_PER_ITER: u64 = 1_000;

/// End-to-end submit, batch, and deliver across worker counts.
fn bench_pipeline_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("pipeline");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Elements(RECORDS_PER_ITER));

    for concurrency in [1, 4, 20] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter_custom(|iters| {
                    rt.block_on(async {
                        let mut total = Duration::ZERO;
                        for _ in 0..iters {
                            let config = PipelineConfig {
                                concurrency,
                                queue_capacity: 512,
                                ..PipelineConfig::default()
                            };
                            let pipeline =
                                Pipeline::start(ScriptedTransport::new(), config).unwrap();

                            let start = Instant::now();
                            for n in 0..RECORDS_PER_ITER {
                                pipeline.submit(json!({"n": n, "msg": "benchmark"})).await.unwrap();
                            }
                            let stats = pipeline.shutdown().await.unwrap();
                            total += start.elapsed();

                            black_box(stats);
                        }
                        total
                    })
                });
            },
        );
    }

    group.finish();
}

/// Batch accumulation from a pre-filled queue at different thresholds.
fn bench_batch_accumulation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("accumulation");
    group.throughput(Throughput::Elements(RECORDS_PER_ITER));

    for threshold in [1_000, 100_000] {
        group.bench_with_input(
            BenchmarkId::new("max_batch_bytes", threshold),
            &threshold,
            |b, &threshold| {
                b.iter_custom(|iters| {
                    rt.block_on(async {
                        let accumulator = BatchAccumulator::new(threshold).unwrap();
                        let record = Bytes::from(vec![b'x'; 200]);
                        let mut total = Duration::ZERO;

                        for _ in 0..iters {
                            let queue = BoundedQueue::new(RECORDS_PER_ITER as usize).unwrap();
                            for _ in 0..RECORDS_PER_ITER {
                                queue.submit(record.clone()).await.unwrap();
                            }

                            let start = Instant::now();
                            while !queue.is_empty() {
                                black_box(accumulator.build(&queue).await);
                            }
                            total += start.elapsed();
                        }
                        total
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline_throughput, bench_batch_accumulation);
criterion_main!(benches);
