use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{
    EventEnvelope, EventStore, EventStoreConfig, EventStoreExt, InMemoryEventStore,
    MetadataMatcher, Operator, Stream, StreamName, Version,
};
use futures_util::StreamExt;

fn make_event(aggregate_id: &str, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .event_name("OrderCreated")
        .aggregate("order", aggregate_id, Version::new(version))
        .payload_raw(serde_json::json!({
            "order_id": aggregate_id,
            "customer_id": "00000000-0000-0000-0000-000000000001"
        }))
        .build()
}

fn stream_name(name: &str) -> StreamName {
    StreamName::new(name).unwrap()
}

async fn populated_store(events: i64, batch_size: usize) -> InMemoryEventStore {
    let store = InMemoryEventStore::new()
        .with_config(EventStoreConfig::new().load_batch_size(batch_size))
        .unwrap();
    let events = (1..=events).map(|v| make_event("1", v)).collect();
    store
        .create(Stream::new(stream_name("order-1")).with_events(events))
        .await
        .unwrap();
    store
}

fn bench_append_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = populated_store(0, 1000).await;
                store
                    .append_event(&stream_name("order-1"), make_event("1", 1))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_append_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/append_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = populated_store(0, 1000).await;
                let events: Vec<EventEnvelope> = (1..=10).map(|v| make_event("1", v)).collect();
                store
                    .append_to(&stream_name("order-1"), events)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_paged(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(populated_store(1000, 100));

    c.bench_function("event_store/load_1000_in_pages_of_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store
                    .load(&stream_name("order-1"), Version::first(), None, None)
                    .await
                    .unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

fn bench_load_reverse(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(populated_store(1000, 1000));

    c.bench_function("event_store/load_reverse_last_50", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events: Vec<_> = store
                    .load_reverse(&stream_name("order-1"), None, Some(50), None)
                    .await
                    .unwrap()
                    .collect()
                    .await;
                assert_eq!(events.len(), 50);
            });
        });
    });
}

fn bench_load_with_matcher(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = rt.block_on(populated_store(1000, 1000));
    let matcher = MetadataMatcher::new()
        .with("_aggregate_version", Operator::GreaterThan, 900)
        .unwrap();

    c.bench_function("event_store/load_with_matcher", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events: Vec<_> = store
                    .load(
                        &stream_name("order-1"),
                        Version::first(),
                        None,
                        Some(&matcher),
                    )
                    .await
                    .unwrap()
                    .collect()
                    .await;
                assert_eq!(events.len(), 100);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_append_single_event,
    bench_append_batch_10,
    bench_load_paged,
    bench_load_reverse,
    bench_load_with_matcher,
);
criterion_main!(benches);
