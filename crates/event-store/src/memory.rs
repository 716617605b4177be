use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::event::{AGGREGATE_ID, AGGREGATE_TYPE, AGGREGATE_VERSION};
use crate::iterator::{Direction, PageReader, StreamIterator};
use crate::store::{EventStore, EventStream, TransactionalEventStore};
use crate::{
    EventEnvelope, EventStoreConfig, EventStoreError, MetadataMatcher, Result, Stream, StreamName,
    Version,
};

#[derive(Debug, Clone, Default)]
struct MemoryStream {
    catalog_no: u64,
    metadata: HashMap<String, Value>,
    events: Vec<EventEnvelope>,
}

#[derive(Debug, Clone, Default)]
struct State {
    streams: HashMap<StreamName, MemoryStream>,
    next_catalog_no: u64,
}

/// In-memory event store implementation for testing.
///
/// Numbers events sequentially per stream and enforces the same uniqueness
/// rules as the single-stream table layout: one `event_id` per stream and
/// one event per aggregate type, id and version.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<State>>,
    transaction: Arc<Mutex<Option<State>>>,
    config: EventStoreConfig,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EventStoreConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Returns the total number of events stored across all streams.
    pub async fn event_count(&self) -> usize {
        self.state
            .read()
            .await
            .streams
            .values()
            .map(|s| s.events.len())
            .sum()
    }

    /// Removes every stream.
    pub async fn clear(&self) {
        *self.state.write().await = State::default();
    }

    async fn open_iterator(
        &self,
        stream_name: &StreamName,
        from: Version,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
        direction: Direction,
    ) -> Result<EventStream> {
        let events = {
            let state = self.state.read().await;
            let stream = state
                .streams
                .get(stream_name)
                .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))?;
            Arc::new(stream.events.clone())
        };

        let reader = MemoryPageReader {
            events,
            matcher: matcher.cloned(),
        };
        let iterator =
            StreamIterator::open(reader, from, count, self.config.load_batch_size, direction)
                .await?;
        Ok(iterator.into_stream())
    }

    fn sorted_names(state: &State, filter: impl Fn(&StreamName) -> bool) -> Vec<StreamName> {
        let mut streams: Vec<_> = state
            .streams
            .iter()
            .filter(|(name, _)| filter(name))
            .map(|(name, stream)| (stream.catalog_no, name.clone()))
            .collect();
        streams.sort_by_key(|(no, _)| *no);
        streams.into_iter().map(|(_, name)| name).collect()
    }
}

fn aggregate_key(event: &EventEnvelope) -> Option<(String, String, String)> {
    let text = |key: &str| {
        event.metadata.get(key).map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    };
    Some((
        text(AGGREGATE_TYPE)?,
        text(AGGREGATE_ID)?,
        text(AGGREGATE_VERSION)?,
    ))
}

/// Assigns numbers and checks uniqueness for the whole batch before any
/// event lands, so a rejected batch leaves the stream untouched.
fn append_batch(
    stream_name: &StreamName,
    stream: &mut MemoryStream,
    events: Vec<EventEnvelope>,
) -> Result<()> {
    let mut event_ids: HashSet<_> = stream.events.iter().map(|e| e.event_id).collect();
    let mut aggregate_keys: HashSet<_> = stream.events.iter().filter_map(aggregate_key).collect();

    let conflict = || EventStoreError::Concurrency {
        stream: stream_name.clone(),
    };

    let mut next_no = stream.events.last().map(|e| e.no.as_i64()).unwrap_or(0);
    let mut numbered = Vec::with_capacity(events.len());
    for mut event in events {
        if !event_ids.insert(event.event_id) {
            return Err(conflict());
        }
        if let Some(key) = aggregate_key(&event)
            && !aggregate_keys.insert(key)
        {
            return Err(conflict());
        }
        next_no += 1;
        event.no = Version::new(next_no);
        numbered.push(event);
    }

    stream.events.extend(numbered);
    Ok(())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn create(&self, stream: Stream) -> Result<()> {
        let mut state = self.state.write().await;
        if state.streams.contains_key(&stream.name) {
            return Err(EventStoreError::StreamExistsAlready(stream.name));
        }

        state.next_catalog_no += 1;
        let created = MemoryStream {
            catalog_no: state.next_catalog_no,
            metadata: stream.metadata,
            events: Vec::new(),
        };

        // The stream stays registered, empty, when its initial events conflict.
        let count = stream.events.len() as u64;
        let created = state.streams.entry(stream.name.clone()).or_insert(created);
        append_batch(&stream.name, created, stream.events)?;
        if count > 0 {
            metrics::counter!("event_store_events_appended").increment(count);
        }
        Ok(())
    }

    async fn append_to(&self, stream_name: &StreamName, events: Vec<EventEnvelope>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut state = self.state.write().await;
        let stream = state
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))?;

        let count = events.len() as u64;
        append_batch(stream_name, stream, events)?;
        metrics::counter!("event_store_events_appended").increment(count);
        Ok(())
    }

    async fn load(
        &self,
        stream_name: &StreamName,
        from: Version,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventStream> {
        self.open_iterator(stream_name, from, count, matcher, Direction::Forward)
            .await
    }

    async fn load_reverse(
        &self,
        stream_name: &StreamName,
        from: Option<Version>,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventStream> {
        let from = from.unwrap_or(Version::MAX);
        self.open_iterator(stream_name, from, count, matcher, Direction::Backward)
            .await
    }

    async fn delete(&self, stream_name: &StreamName) -> Result<()> {
        self.state
            .write()
            .await
            .streams
            .remove(stream_name)
            .map(|_| ())
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))
    }

    async fn has_stream(&self, stream_name: &StreamName) -> Result<bool> {
        Ok(self.state.read().await.streams.contains_key(stream_name))
    }

    async fn fetch_stream_metadata(
        &self,
        stream_name: &StreamName,
    ) -> Result<HashMap<String, Value>> {
        self.state
            .read()
            .await
            .streams
            .get(stream_name)
            .map(|s| s.metadata.clone())
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))
    }

    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: HashMap<String, Value>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let stream = state
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))?;
        stream.metadata = metadata;
        Ok(())
    }

    async fn fetch_all_stream_names(&self) -> Result<Vec<StreamName>> {
        let state = self.state.read().await;
        Ok(Self::sorted_names(&state, |name| !name.is_internal()))
    }

    async fn fetch_category_stream_names(&self, categories: &[String]) -> Result<Vec<StreamName>> {
        let state = self.state.read().await;
        let prefixes: Vec<String> = categories.iter().map(|c| format!("{c}-")).collect();
        Ok(Self::sorted_names(&state, |name| {
            prefixes
                .iter()
                .any(|prefix| name.as_str().starts_with(prefix.as_str()))
        }))
    }
}

#[async_trait]
impl TransactionalEventStore for InMemoryEventStore {
    async fn begin_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(EventStoreError::TransactionAlreadyStarted);
        }
        *transaction = Some(self.state.read().await.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.transaction
            .lock()
            .await
            .take()
            .map(|_| ())
            .ok_or(EventStoreError::TransactionNotStarted)
    }

    async fn rollback(&self) -> Result<()> {
        let saved = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(EventStoreError::TransactionNotStarted)?;
        *self.state.write().await = saved;
        Ok(())
    }

    async fn in_transaction(&self) -> bool {
        self.transaction.lock().await.is_some()
    }
}

struct MemoryPageReader {
    events: Arc<Vec<EventEnvelope>>,
    matcher: Option<MetadataMatcher>,
}

#[async_trait]
impl PageReader for MemoryPageReader {
    async fn read_page(
        &self,
        from: Version,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<EventEnvelope>> {
        let matches = |e: &&EventEnvelope| {
            self.matcher
                .as_ref()
                .is_none_or(|m| m.matches(&e.metadata))
        };

        let page = match direction {
            Direction::Forward => self
                .events
                .iter()
                .filter(|e| e.no >= from)
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
            Direction::Backward => self
                .events
                .iter()
                .rev()
                .filter(|e| e.no <= from)
                .filter(matches)
                .take(limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }
}
