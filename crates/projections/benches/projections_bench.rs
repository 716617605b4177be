use std::time::Duration;

use async_trait::async_trait;
use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{EventEnvelope, EventStore, InMemoryEventStore, Stream, StreamName, Version};
use projections::{
    HandlerContext, InMemoryCheckpointStore, ProjectionName, ProjectorOptions, ReadModel,
    ReadModelProjector, handler,
};
use serde_json::{Value, json};

#[derive(Debug, Default)]
struct CountingReadModel {
    rows: usize,
}

#[async_trait]
impl ReadModel for CountingReadModel {
    async fn init(&mut self) -> projections::Result<()> {
        Ok(())
    }

    async fn is_initialized(&self) -> projections::Result<bool> {
        Ok(true)
    }

    async fn reset(&mut self) -> projections::Result<()> {
        self.rows = 0;
        Ok(())
    }

    async fn delete(&mut self) -> projections::Result<()> {
        self.rows = 0;
        Ok(())
    }

    async fn persist(&mut self) -> projections::Result<()> {
        Ok(())
    }
}

fn make_envelope(order: usize, version: i64, event_name: &str) -> EventEnvelope {
    EventEnvelope::builder()
        .event_name(event_name)
        .aggregate("order", order.to_string(), Version::new(version))
        .payload_raw(json!({"order": order, "amount": 1000}))
        .build()
}

/// Populate a store with N order streams, each having 3 events.
async fn populate_store(store: &InMemoryEventStore, n: usize) {
    for order in 0..n {
        let events = vec![
            make_envelope(order, 1, "OrderCreated"),
            make_envelope(order, 2, "ItemAdded"),
            make_envelope(order, 3, "OrderSubmitted"),
        ];
        store
            .create(
                Stream::new(StreamName::new(format!("order-{order}")).unwrap())
                    .with_events(events),
            )
            .await
            .unwrap();
    }
}

async fn catch_up(store: InMemoryEventStore, persist_block_size: usize) {
    let mut projector = ReadModelProjector::new(
        ProjectionName::new("order_totals").unwrap(),
        store,
        InMemoryCheckpointStore::new(),
        CountingReadModel::default(),
        ProjectorOptions::new()
            .persist_block_size(persist_block_size)
            .sleep(Duration::ZERO),
    )
    .unwrap()
    .from_category("order")
    .unwrap()
    .when([
        (
            "OrderCreated",
            handler(
                |state: &Value, _: &EventEnvelope, ctx: &mut HandlerContext<'_, CountingReadModel>| {
                    ctx.read_model_mut().rows += 1;
                    let orders = state["orders"].as_i64().unwrap_or(0);
                    Some(json!({"orders": orders + 1}))
                },
            ),
        ),
        (
            "OrderSubmitted",
            handler(
                |_: &Value, _: &EventEnvelope, _: &mut HandlerContext<'_, CountingReadModel>| None,
            ),
        ),
    ])
    .unwrap();

    projector.run(false).await.unwrap();
}

fn bench_catch_up_100_orders(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 100));

    c.bench_function("projections/catch_up_300_events", |b| {
        b.iter(|| rt.block_on(catch_up(store.clone(), 1000)));
    });
}

fn bench_catch_up_1000_orders(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 1000));

    c.bench_function("projections/catch_up_3000_events", |b| {
        b.iter(|| rt.block_on(catch_up(store.clone(), 1000)));
    });
}

fn bench_catch_up_persist_every_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(populate_store(&store, 100));

    c.bench_function("projections/catch_up_300_events_persist_each", |b| {
        b.iter(|| rt.block_on(catch_up(store.clone(), 1)));
    });
}

criterion_group!(
    benches,
    bench_catch_up_100_orders,
    bench_catch_up_1000_orders,
    bench_catch_up_persist_every_event,
);
criterion_main!(benches);
