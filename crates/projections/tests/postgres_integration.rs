//! PostgreSQL integration tests for the checkpoint store and projector.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p projections --test postgres_integration
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use event_store::{
    EventEnvelope, EventStore, PostgresEventStore, SingleStreamStrategy, Stream, StreamName,
    Version,
};
use projections::{
    Checkpoint, CheckpointStore, HandlerContext, PostgresCheckpointStore, ProjectionError,
    ProjectionManager, ProjectionName, ProjectionStatus, ProjectorOptions, ReadModel,
    ReadModelProjector,
};
use serde_json::{Value, json};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            for migration in [
                include_str!("../../../migrations/001_create_event_streams_table.sql"),
                include_str!("../../../migrations/002_create_projections_table.sql"),
            ] {
                sqlx::raw_sql(migration).execute(&temp_pool).await.unwrap();
            }
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Fresh pool with the catalog and projections tables emptied.
async fn get_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE projections")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

#[derive(Debug, Default)]
struct NoopReadModel;

#[async_trait]
impl ReadModel for NoopReadModel {
    async fn init(&mut self) -> projections::Result<()> {
        Ok(())
    }

    async fn is_initialized(&self) -> projections::Result<bool> {
        Ok(true)
    }

    async fn reset(&mut self) -> projections::Result<()> {
        Ok(())
    }

    async fn delete(&mut self) -> projections::Result<()> {
        Ok(())
    }

    async fn persist(&mut self) -> projections::Result<()> {
        Ok(())
    }
}

fn name(s: &str) -> ProjectionName {
    ProjectionName::new(s).unwrap()
}

#[tokio::test]
#[serial]
async fn checkpoint_roundtrip() {
    let store = PostgresCheckpointStore::new(get_pool().await);
    let p = name("orders");

    store
        .create_projection(&p, ProjectionStatus::Idle)
        .await
        .unwrap();
    // Duplicate creation is ignored.
    store
        .create_projection(&p, ProjectionStatus::Running)
        .await
        .unwrap();
    assert_eq!(
        store.fetch_status(&p).await.unwrap(),
        Some(ProjectionStatus::Idle)
    );

    let empty = store.load(&p).await.unwrap().unwrap();
    assert_eq!(empty, Checkpoint::default());

    let mut checkpoint = Checkpoint::default();
    checkpoint.positions.insert("orders-1".to_string(), 7);
    checkpoint.state = json!({"count": 3});
    store
        .persist(&p, &checkpoint, Utc::now() + TimeDelta::seconds(1))
        .await
        .unwrap();

    assert_eq!(store.load(&p).await.unwrap(), Some(checkpoint));
    assert!(store.load(&name("missing")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn lease_is_exclusive() {
    let store = PostgresCheckpointStore::new(get_pool().await);
    let p = name("orders");
    store
        .create_projection(&p, ProjectionStatus::Idle)
        .await
        .unwrap();

    let now = Utc::now();
    let until = now + TimeDelta::seconds(30);
    assert!(store.acquire_lock(&p, now, until).await.unwrap());
    assert!(!store.acquire_lock(&p, now, until).await.unwrap());
    assert_eq!(
        store.fetch_status(&p).await.unwrap(),
        Some(ProjectionStatus::Running)
    );

    store.release_lock(&p).await.unwrap();
    let details = store.fetch_projection_details(&p).await.unwrap().unwrap();
    assert_eq!(details.status, ProjectionStatus::Idle);
    assert!(details.locked_until.is_none());
    assert!(store.acquire_lock(&p, now, until).await.unwrap());
}

#[tokio::test]
#[serial]
async fn manager_controls_rows() {
    let store = PostgresCheckpointStore::new(get_pool().await);
    for n in ["b", "a"] {
        store
            .create_projection(&name(n), ProjectionStatus::Idle)
            .await
            .unwrap();
    }
    let manager = ProjectionManager::new(store);

    assert_eq!(
        manager.fetch_projection_names(None, 10, 0).await.unwrap(),
        vec![name("b"), name("a")]
    );
    assert_eq!(
        manager
            .fetch_projection_names(Some("a"), 10, 0)
            .await
            .unwrap(),
        vec![name("a")]
    );

    manager.reset_projection(&name("a")).await.unwrap();
    assert_eq!(
        manager.fetch_projection_status(&name("a")).await.unwrap(),
        ProjectionStatus::Resetting
    );
    assert!(matches!(
        manager.stop_projection(&name("zzz")).await,
        Err(ProjectionError::ProjectionNotFound(_))
    ));
}

#[tokio::test]
#[serial]
async fn projector_runs_against_postgres() {
    let pool = get_pool().await;
    let event_store = PostgresEventStore::new(pool.clone(), SingleStreamStrategy);
    let checkpoints = PostgresCheckpointStore::new(pool);

    let stream_name = StreamName::new(format!("orders-{}", unique_suffix())).unwrap();
    event_store
        .create(Stream::new(stream_name.clone()).with_events(vec![
            event("OrderPlaced", 1),
            event("OrderShipped", 2),
        ]))
        .await
        .unwrap();

    let projection = name("shipments");
    let mut projector = ReadModelProjector::new(
        projection.clone(),
        event_store,
        checkpoints.clone(),
        NoopReadModel,
        ProjectorOptions::new()
            .persist_block_size(1)
            .sleep(Duration::from_millis(1)),
    )
    .unwrap()
    .from_stream(stream_name.clone())
    .unwrap()
    .when([(
        "OrderShipped",
        projections::handler(
            |state: &Value, _: &EventEnvelope, _: &mut HandlerContext<'_, NoopReadModel>| {
                let shipped = state["shipped"].as_i64().unwrap_or(0);
                Some(json!({"shipped": shipped + 1}))
            },
        ),
    )])
    .unwrap();

    projector.run(false).await.unwrap();

    let details = checkpoints
        .fetch_projection_details(&projection)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.state, json!({"shipped": 1}));
    assert_eq!(details.positions.get(stream_name.as_str()), Some(&2));
    assert_eq!(details.status, ProjectionStatus::Idle);
    assert!(details.locked_until.is_none());
}

fn event(event_name: &str, version: i64) -> EventEnvelope {
    EventEnvelope::builder()
        .event_name(event_name)
        .aggregate("order", "1", Version::new(version))
        .payload_raw(json!({}))
        .build()
}

fn unique_suffix() -> String {
    format!("{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}
