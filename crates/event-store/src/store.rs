use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream as FuturesStream;
use futures_util::TryStreamExt;
use futures_util::future::BoxFuture;

use crate::{EventEnvelope, MetadataMatcher, Result, Stream, StreamName, Version};

/// A lazily paginated sequence of events.
pub type EventStream = Pin<Box<dyn FuturesStream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for stream store implementations.
///
/// The store owns a catalog with one row per logical stream and one physical
/// table per stream. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Catalogs a new stream, creates its table and appends its initial events.
    ///
    /// Fails with `StreamExistsAlready` when the name is already cataloged.
    async fn create(&self, stream: Stream) -> Result<()>;

    /// Appends events atomically, in call order.
    ///
    /// An empty list is a no-op. Fails with `StreamNotFound` when the stream
    /// table is missing and with `Concurrency` when a uniqueness constraint
    /// rejects the batch.
    async fn append_to(&self, stream_name: &StreamName, events: Vec<EventEnvelope>) -> Result<()>;

    /// Reads events with `no >= from` in ascending order.
    ///
    /// `count` bounds the number of events (unbounded when `None`); the
    /// matcher filters on metadata.
    async fn load(
        &self,
        stream_name: &StreamName,
        from: Version,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventStream>;

    /// Reads events with `no <= from` in descending order; `None` starts at
    /// the end of the stream.
    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from: Option<Version>,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventStream>;

    /// Removes the catalog row and drops the stream table.
    async fn delete(&self, stream_name: &StreamName) -> Result<()>;

    /// Whether the stream is cataloged.
    async fn has_stream(&self, stream_name: &StreamName) -> Result<bool>;

    async fn fetch_stream_metadata(
        &self,
        stream_name: &StreamName,
    ) -> Result<HashMap<String, serde_json::Value>>;

    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Every cataloged stream except internal (`$`-prefixed) ones, in creation order.
    async fn fetch_all_stream_names(&self) -> Result<Vec<StreamName>>;

    /// Cataloged streams whose name starts with `<category>-` for any of the
    /// given categories, in creation order.
    async fn fetch_category_stream_names(&self, categories: &[String]) -> Result<Vec<StreamName>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the stream.
    async fn append_event(&self, stream_name: &StreamName, event: EventEnvelope) -> Result<()> {
        self.append_to(stream_name, vec![event]).await
    }

    /// Loads the whole stream into memory.
    async fn load_all(&self, stream_name: &StreamName) -> Result<Vec<EventEnvelope>> {
        self.load(stream_name, Version::first(), None, None)
            .await?
            .try_collect()
            .await
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// A store whose operations can be grouped into one database transaction.
///
/// Transaction state is scoped to the store instance (and its clones), not
/// to the caller: overlapping transactions from concurrent tasks on the same
/// instance need external serialization.
#[async_trait]
pub trait TransactionalEventStore: EventStore {
    /// Fails with `TransactionAlreadyStarted` when one is active.
    async fn begin_transaction(&self) -> Result<()>;

    /// Fails with `TransactionNotStarted` when none is active.
    async fn commit(&self) -> Result<()>;

    /// Fails with `TransactionNotStarted` when none is active.
    async fn rollback(&self) -> Result<()>;

    async fn in_transaction(&self) -> bool;
}

pub trait TransactionalEventStoreExt: TransactionalEventStore + Sized {
    /// Runs `f` inside a transaction.
    ///
    /// Commits when `f` succeeds; rolls back and returns `f`'s error otherwise.
    fn transactional<'a, T, F>(&'a self, f: F) -> impl Future<Output = Result<T>> + Send + 'a
    where
        T: Send + 'a,
        F: FnOnce(&'a Self) -> BoxFuture<'a, Result<T>> + Send + 'a,
    {
        async move {
            self.begin_transaction().await?;

            match f(self).await {
                Ok(value) => {
                    self.commit().await?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = self.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback after failed transaction failed");
                    }
                    Err(err)
                }
            }
        }
    }
}

impl<T: TransactionalEventStore + Sized> TransactionalEventStoreExt for T {}
