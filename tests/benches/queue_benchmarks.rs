//! # Event Bus Benchmarks
//!
//! Throughput of the hot paths:
//!
//! | Path | Operation |
//! |------|-----------|
//! | Priority queue | enqueue + dequeue of mixed priorities |
//! | Priority queue | sustained overflow under each drop strategy |
//! | Glob matching | pattern vs. event type |
//! | Dispatcher | emit + drain with one listener |

// Allow excessive nesting in benchmark code
#![allow(clippy::excessive_nesting)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use event_bus::{
    glob_match, Dispatcher, DispatcherConfig, FnListener, OverflowStrategy, PriorityQueue,
    QueueConfig,
};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use trading_types::{Event, EventPriority};

fn mixed_events(count: usize) -> Vec<Event> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|i| {
            let priority = EventPriority::ALL[rng.gen_range(0..EventPriority::ALL.len())];
            Event::new(format!("market.tick.{}", i % 8)).with_priority(priority)
        })
        .collect()
}

// ============================================================================
// PRIORITY QUEUE
// ============================================================================

fn bench_queue_enqueue_dequeue(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority-queue");
    group.measurement_time(Duration::from_secs(5));

    for size in [100, 1_000, 10_000] {
        let events = mixed_events(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(
            BenchmarkId::new("enqueue_dequeue", size),
            &events,
            |b, events| {
                b.iter(|| {
                    let mut queue =
                        PriorityQueue::new(QueueConfig::new(size, OverflowStrategy::DropIncoming));
                    for event in events.iter().cloned() {
                        let _ = queue.enqueue(event);
                    }
                    while let Some(queued) = queue.dequeue() {
                        black_box(queued);
                    }
                })
            },
        );
    }

    group.finish();
}

fn bench_queue_overflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("priority-queue-overflow");
    let events = mixed_events(5_000);

    for strategy in [
        OverflowStrategy::DropIncoming,
        OverflowStrategy::DropOldest,
        OverflowStrategy::DropLowestPriority,
    ] {
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("saturated", format!("{strategy:?}")),
            &events,
            |b, events| {
                b.iter(|| {
                    let mut queue = PriorityQueue::new(QueueConfig::new(500, strategy));
                    for event in events.iter().cloned() {
                        let _ = black_box(queue.enqueue(event));
                    }
                    black_box(queue.len())
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// MATCHING
// ============================================================================

fn bench_glob_match(c: &mut Criterion) {
    let mut group = c.benchmark_group("glob-match");
    let cases = [
        ("exact", "market.tick", "market.tick"),
        ("suffix", "market.*", "market.tick.BTCUSDT"),
        ("infix", "market.*.BTC*", "market.tick.BTCUSDT"),
        ("miss", "order.*", "market.tick.BTCUSDT"),
    ];

    for (name, pattern, text) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(glob_match(black_box(pattern), black_box(text))))
        });
    }

    group.finish();
}

// ============================================================================
// DISPATCHER
// ============================================================================

fn bench_dispatch(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let mut group = c.benchmark_group("dispatcher");
    group.measurement_time(Duration::from_secs(5));

    for size in [100, 1_000] {
        let events = mixed_events(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("emit_drain", size), &events, |b, events| {
            b.iter(|| {
                runtime.block_on(async {
                    let bus = Dispatcher::new(DispatcherConfig {
                        queue: QueueConfig::new(size, OverflowStrategy::DropIncoming),
                        ..DispatcherConfig::default()
                    })
                    .expect("valid config");
                    bus.subscribe_to_pattern(
                        "market.*",
                        Arc::new(FnListener::from_sync("sink", |_| Ok(())).expect("name")),
                    );
                    for event in events.iter().cloned() {
                        let _ = bus.emit_event(event).await;
                    }
                    bus.drain_queue().await;
                    black_box(bus.metrics().total_processed)
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_enqueue_dequeue,
    bench_queue_overflow,
    bench_glob_match,
    bench_dispatch
);
criterion_main!(benches);
