use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use liftride_core::{RideEvent, RideValidator, StorageItem};
use liftride_infra::{BatchPolicy, BatchWriteBuffer, InMemoryRideStore, PublishChannelPool, SuccessAccounting};
use liftride_queue::{InMemoryBroker, MessageBroker, PublishChannel};
use std::sync::Arc;
use std::thread;

fn item(n: u32) -> StorageItem {
    StorageItem::from(&RideEvent {
        skier_id: 1 + n % 100_000,
        resort_id: 1 + n % 10,
        lift_id: 1 + n % 40,
        season_id: "2024".to_string(),
        day_id: (1 + n % 3).to_string(),
        time: 1 + n % 360,
    })
}

fn buffer(store: InMemoryRideStore) -> BatchWriteBuffer<InMemoryRideStore> {
    BatchWriteBuffer::new(
        store,
        BatchPolicy::default().with_backoff_base(std::time::Duration::ZERO),
        Arc::new(SuccessAccounting::new()),
    )
}

fn bench_validate(c: &mut Criterion) {
    let validator = RideValidator::default();
    c.bench_function("validate_ride", |b| {
        b.iter(|| {
            validator.validate(
                black_box("/3/seasons/2024/days/1/skiers/123"),
                black_box(br#"{"liftID":5,"time":120}"#),
            )
        })
    });
}

fn bench_append_single_thread(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_append");
    for n in [100u32, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                let buf = buffer(InMemoryRideStore::new());
                for i in 0..n {
                    buf.append(item(i));
                }
                black_box(buf.flush())
            })
        });
    }
    group.finish();
}

fn bench_append_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_append_contended");
    for threads in [2usize, 8] {
        group.throughput(Throughput::Elements((threads * 1_000) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let buf = Arc::new(buffer(InMemoryRideStore::new()));
                let handles: Vec<_> = (0..threads)
                    .map(|t| {
                        let buf = Arc::clone(&buf);
                        thread::spawn(move || {
                            for i in 0..1_000u32 {
                                buf.append(item(t as u32 * 1_000 + i));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
                black_box(buf.flush())
            })
        });
    }
    group.finish();
}

fn bench_throttled_flush(c: &mut Criterion) {
    c.bench_function("flush_throttled_store", |b| {
        b.iter(|| {
            let buf = buffer(InMemoryRideStore::new().with_write_capacity(10));
            for i in 0..24 {
                buf.append(item(i));
            }
            black_box(buf.flush())
        })
    });
}

fn bench_pooled_publish(c: &mut Criterion) {
    let broker = InMemoryBroker::new();
    broker.declare_queue("bench").unwrap();
    let pool = PublishChannelPool::open(4, |_| broker.create_channel()).unwrap();
    let payload = br#"{"skierID":"1","resortID":"1","liftID":"1","seasonID":"2024","dayID":"1","time":"1"}"#;

    c.bench_function("pooled_publish", |b| {
        b.iter(|| {
            let mut ch = pool.acquire().unwrap();
            ch.publish("bench", black_box(payload)).unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_validate,
    bench_append_single_thread,
    bench_append_contended,
    bench_throttled_flush,
    bench_pooled_publish
);
criterion_main!(benches);
