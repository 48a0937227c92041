//! Performance benchmarks for the stream client hot paths.

use agent_stream::{
    protocol, BucketConfig, BucketStore, DisplayConfig, DisplayLimiter, Event, EventQueue,
    OverflowStrategy, Timestamp,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn full_store(priority: usize, regular: usize) -> BucketStore {
    let mut store = BucketStore::new(&BucketConfig {
        priority_capacity: priority.max(1),
        regular_capacity: regular.max(1),
        ..Default::default()
    });
    let mut id = 0u64;
    for i in 0..priority {
        id += 1;
        store
            .add_event(Event::new(id, "s", 1 + (i as i64) * 7).with_priority(1))
            .unwrap();
    }
    for i in 0..regular {
        id += 1;
        store.add_event(Event::new(id, "s", 1 + (i as i64) * 3)).unwrap();
    }
    store
}

/// Inserts into buckets that are already full, so every insert evicts.
fn bench_add_event_at_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_event_at_capacity");

    for capacity in [100, 500, 2000] {
        group.bench_with_input(
            BenchmarkId::new("capacity", capacity),
            &capacity,
            |b, &capacity| {
                let mut store = full_store(capacity, capacity);
                let mut id = 1_000_000u64;
                b.iter(|| {
                    id += 1;
                    let event = Event::new(id, "s", id as i64).with_priority((id % 4 == 0) as u32);
                    black_box(store.add_event(event).unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_compute_view(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_view");
    let store = full_store(200, 500);

    for strategy in [
        OverflowStrategy::RemoveOldestRegular,
        OverflowStrategy::RemoveOldestPriority,
        OverflowStrategy::StrictLimits,
    ] {
        let limiter = DisplayLimiter::new(DisplayConfig {
            strategy,
            ..Default::default()
        });
        group.bench_with_input(
            BenchmarkId::new("strategy", format!("{:?}", strategy)),
            &limiter,
            |b, limiter| {
                b.iter(|| black_box(limiter.compute_view(&store)));
            },
        );
    }

    group.finish();
}

fn bench_queue_consolidation(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_consolidation");

    for topics in [1usize, 10, 100] {
        group.bench_with_input(BenchmarkId::new("topics", topics), &topics, |b, &topics| {
            b.iter(|| {
                let mut queue = EventQueue::new();
                for i in 0..1000u64 {
                    let topic = format!("topic-{}", i as usize % topics);
                    queue.push(Event::new(i + 1, topic, 1), Timestamp(i as i64));
                }
                black_box(queue.drain())
            });
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = r#"{"type":"priority_event","data":{"id":42,"session_id":"sess-1","timestamp":1700000000000,"priority":2,"source_app":"planner","hook_event_type":"PreToolUse","payload":{"tool":"Bash","input":{"command":"ls -la"}}},"priority_info":{"protocol_version":"2.0"}}"#;

    c.bench_function("decode_priority_event", |b| {
        b.iter(|| black_box(protocol::decode(black_box(frame)).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_add_event_at_capacity,
    bench_compute_view,
    bench_queue_consolidation,
    bench_decode,
);
criterion_main!(benches);
