use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tokio::sync::Mutex;

use crate::error::sqlstate;
use crate::iterator::{Direction, PageReader, StreamIterator};
use crate::message::{EnvelopeMessageFactory, MessageFactory, StoredEvent};
use crate::metadata::{MetadataMatch, Operator};
use crate::store::{EventStore, EventStream, TransactionalEventStore};
use crate::strategy::{ColumnValue, PersistenceStrategy};
use crate::{
    EventEnvelope, EventStoreConfig, EventStoreError, MetadataMatcher, Result, Stream, StreamName,
    Version,
};

/// SQLSTATE for "relation does not exist".
const UNDEFINED_TABLE: &str = "42P01";

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// PostgreSQL-backed stream store.
///
/// Clones share the pool and the transaction slot, so a transaction begun
/// through one clone is visible to all of them.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    strategy: Arc<dyn PersistenceStrategy>,
    message_factory: Arc<dyn MessageFactory>,
    config: EventStoreConfig,
    transaction: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl PostgresEventStore {
    /// Creates a store with the default configuration.
    pub fn new(pool: PgPool, strategy: impl PersistenceStrategy + 'static) -> Self {
        Self {
            pool,
            strategy: Arc::new(strategy),
            message_factory: Arc::new(EnvelopeMessageFactory),
            config: EventStoreConfig::default(),
            transaction: Arc::new(Mutex::new(None)),
        }
    }

    /// Replaces the configuration after validating it.
    pub fn with_config(mut self, config: EventStoreConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Replaces the factory turning rows into envelopes.
    pub fn with_message_factory(mut self, factory: impl MessageFactory + 'static) -> Self {
        self.message_factory = Arc::new(factory);
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn config(&self) -> &EventStoreConfig {
        &self.config
    }

    pub fn strategy(&self) -> &dyn PersistenceStrategy {
        self.strategy.as_ref()
    }

    /// Runs the database migrations (catalog and projections tables).
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    // Statements run on the open transaction when there is one, on the pool otherwise.

    async fn execute(&self, query: PgQuery<'_>) -> std::result::Result<PgQueryResult, sqlx::Error> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.execute(&mut **tx).await;
        }
        drop(transaction);
        query.execute(&self.pool).await
    }

    async fn fetch_all(&self, query: PgQuery<'_>) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.fetch_all(&mut **tx).await;
        }
        drop(transaction);
        query.fetch_all(&self.pool).await
    }

    async fn fetch_optional(
        &self,
        query: PgQuery<'_>,
    ) -> std::result::Result<Option<PgRow>, sqlx::Error> {
        let mut transaction = self.transaction.lock().await;
        if let Some(tx) = transaction.as_mut() {
            return query.fetch_optional(&mut **tx).await;
        }
        drop(transaction);
        query.fetch_optional(&self.pool).await
    }

    async fn add_stream_to_streams_table(&self, stream: &Stream, table_name: &str) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (real_stream_name, stream_name, metadata, category) VALUES ($1, $2, $3, $4)",
            self.config.event_streams_table
        );
        let metadata = serde_json::to_value(&stream.metadata)?;

        let result = self
            .execute(
                sqlx::query(&sql)
                    .bind(stream.name.as_str())
                    .bind(table_name)
                    .bind(metadata)
                    .bind(stream.name.category()),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match sqlstate(&err) {
                Some(code) if self.strategy.is_unique_violation(&code) => {
                    Err(EventStoreError::StreamExistsAlready(stream.name.clone()))
                }
                _ => {
                    tracing::error!(error = %err, "insert into stream catalog failed; is the catalog table set up?");
                    Err(EventStoreError::backend(err))
                }
            },
        }
    }

    async fn remove_stream_from_streams_table(&self, stream_name: &StreamName) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE real_stream_name = $1",
            self.config.event_streams_table
        );
        let result = self
            .execute(sqlx::query(&sql).bind(stream_name.as_str()))
            .await?;

        if result.rows_affected() != 1 {
            return Err(EventStoreError::StreamNotFound(stream_name.clone()));
        }
        Ok(())
    }

    async fn create_schema_for(&self, table_name: &str) -> Result<()> {
        for statement in self.strategy.create_schema(table_name) {
            self.execute(sqlx::query(&statement))
                .await
                .map_err(EventStoreError::backend)?;
        }
        Ok(())
    }

    async fn drop_table(&self, table_name: &str) -> Result<()> {
        self.execute(sqlx::query(&format!("DROP TABLE IF EXISTS {table_name}")))
            .await?;
        Ok(())
    }

    async fn open_iterator(
        &self,
        stream_name: &StreamName,
        from: Version,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
        direction: Direction,
    ) -> Result<EventStream> {
        let reader = PostgresPageReader {
            store: self.clone(),
            table_name: self.strategy.table_name(stream_name),
            stream_name: stream_name.clone(),
            matcher: matcher.cloned(),
        };

        let iterator =
            StreamIterator::open(reader, from, count, self.config.load_batch_size, direction)
                .await?;
        Ok(iterator.into_stream())
    }

    fn row_to_stored(row: &PgRow) -> std::result::Result<StoredEvent, sqlx::Error> {
        Ok(StoredEvent {
            no: row.try_get("no")?,
            event_id: row.try_get("event_id")?,
            event_name: row.try_get("event_name")?,
            payload: row.try_get("payload")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn rows_to_stream_names(rows: Vec<PgRow>) -> Result<Vec<StreamName>> {
        rows.into_iter()
            .map(|row| -> Result<StreamName> {
                let name: String = row.try_get("real_stream_name")?;
                Ok(StreamName::new(name)?)
            })
            .collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[tracing::instrument(skip(self, stream), fields(stream = %stream.name))]
    async fn create(&self, stream: Stream) -> Result<()> {
        let table_name = self.strategy.table_name(&stream.name);

        self.add_stream_to_streams_table(&stream, &table_name)
            .await?;

        if let Err(err) = self.create_schema_for(&table_name).await {
            tracing::warn!(error = %err, table = %table_name, "creating stream table failed, rolling back catalog entry");

            if let Err(drop_err) = self.drop_table(&table_name).await {
                tracing::warn!(error = %drop_err, "dropping partial stream table failed");
            }
            if let Err(remove_err) = self.remove_stream_from_streams_table(&stream.name).await {
                tracing::warn!(error = %remove_err, "removing catalog entry failed");
            }

            return Err(err);
        }

        tracing::debug!(table = %table_name, "stream created");

        self.append_to(&stream.name, stream.events).await
    }

    #[tracing::instrument(skip(self, events), fields(stream = %stream_name, events = events.len()))]
    async fn append_to(&self, stream_name: &StreamName, events: Vec<EventEnvelope>) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let rows = self.strategy.prepare_rows(&events)?;
        let table_name = self.strategy.table_name(stream_name);
        let columns = self.strategy.column_names().join(", ");

        let mut builder =
            QueryBuilder::<Postgres>::new(format!("INSERT INTO {table_name} ({columns}) "));
        builder.push_values(rows, |mut separated, row| {
            for value in row {
                match value {
                    ColumnValue::Int(v) => {
                        separated.push_bind(v);
                    }
                    ColumnValue::Text(v) => {
                        separated.push_bind(v);
                    }
                    ColumnValue::Uuid(v) => {
                        separated.push_bind(v);
                    }
                    ColumnValue::Json(v) => {
                        separated.push_bind(v);
                    }
                    ColumnValue::Timestamp(v) => {
                        separated.push_bind(v);
                    }
                }
            }
        });

        match self.execute(builder.build()).await {
            Ok(result) => {
                metrics::counter!("event_store_events_appended").increment(result.rows_affected());
                Ok(())
            }
            Err(err) => match sqlstate(&err).as_deref() {
                Some(UNDEFINED_TABLE) => Err(EventStoreError::StreamNotFound(stream_name.clone())),
                Some(code) if self.strategy.is_unique_violation(code) => {
                    metrics::counter!("event_store_concurrency_conflicts").increment(1);
                    Err(EventStoreError::Concurrency {
                        stream: stream_name.clone(),
                    })
                }
                _ => Err(EventStoreError::backend(err)),
            },
        }
    }

    #[tracing::instrument(skip(self, matcher), fields(stream = %stream_name))]
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

    #[tracing::instrument(skip(self, matcher), fields(stream = %stream_name))]
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

    #[tracing::instrument(skip(self), fields(stream = %stream_name))]
    async fn delete(&self, stream_name: &StreamName) -> Result<()> {
        self.remove_stream_from_streams_table(stream_name).await?;
        self.drop_table(&self.strategy.table_name(stream_name))
            .await
    }

    async fn has_stream(&self, stream_name: &StreamName) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE real_stream_name = $1",
            self.config.event_streams_table
        );
        let row = self
            .fetch_optional(sqlx::query(&sql).bind(stream_name.as_str()))
            .await?;
        Ok(row.is_some())
    }

    async fn fetch_stream_metadata(
        &self,
        stream_name: &StreamName,
    ) -> Result<HashMap<String, Value>> {
        let sql = format!(
            "SELECT metadata FROM {} WHERE real_stream_name = $1",
            self.config.event_streams_table
        );
        let row = self
            .fetch_optional(sqlx::query(&sql).bind(stream_name.as_str()))
            .await?
            .ok_or_else(|| EventStoreError::StreamNotFound(stream_name.clone()))?;

        let metadata: Option<Value> = row.try_get("metadata")?;
        match metadata {
            Some(metadata) => Ok(serde_json::from_value(metadata)?),
            None => Ok(HashMap::new()),
        }
    }

    #[tracing::instrument(skip(self, metadata), fields(stream = %stream_name))]
    async fn update_stream_metadata(
        &self,
        stream_name: &StreamName,
        metadata: HashMap<String, Value>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET metadata = $1 WHERE real_stream_name = $2",
            self.config.event_streams_table
        );
        let result = self
            .execute(
                sqlx::query(&sql)
                    .bind(serde_json::to_value(&metadata)?)
                    .bind(stream_name.as_str()),
            )
            .await?;

        if result.rows_affected() != 1 {
            return Err(EventStoreError::StreamNotFound(stream_name.clone()));
        }
        Ok(())
    }

    async fn fetch_all_stream_names(&self) -> Result<Vec<StreamName>> {
        let sql = format!(
            "SELECT real_stream_name FROM {} WHERE real_stream_name NOT LIKE '$%' ORDER BY no",
            self.config.event_streams_table
        );
        let rows = self.fetch_all(sqlx::query(&sql)).await?;
        Self::rows_to_stream_names(rows)
    }

    async fn fetch_category_stream_names(&self, categories: &[String]) -> Result<Vec<StreamName>> {
        if categories.is_empty() {
            return Ok(Vec::new());
        }

        let patterns: Vec<String> = categories
            .iter()
            .map(|category| format!("{}-%", escape_like(category)))
            .collect();
        let sql = format!(
            "SELECT real_stream_name FROM {} WHERE real_stream_name LIKE ANY($1) ORDER BY no",
            self.config.event_streams_table
        );
        let rows = self.fetch_all(sqlx::query(&sql).bind(patterns)).await?;
        Self::rows_to_stream_names(rows)
    }
}

#[async_trait]
impl TransactionalEventStore for PostgresEventStore {
    async fn begin_transaction(&self) -> Result<()> {
        let mut transaction = self.transaction.lock().await;
        if transaction.is_some() {
            return Err(EventStoreError::TransactionAlreadyStarted);
        }
        *transaction = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(EventStoreError::TransactionNotStarted)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        let tx = self
            .transaction
            .lock()
            .await
            .take()
            .ok_or(EventStoreError::TransactionNotStarted)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn in_transaction(&self) -> bool {
        self.transaction.lock().await.is_some()
    }
}

/// Range queries against one stream table for the [`StreamIterator`].
struct PostgresPageReader {
    store: PostgresEventStore,
    table_name: String,
    stream_name: StreamName,
    matcher: Option<MetadataMatcher>,
}

#[async_trait]
impl PageReader for PostgresPageReader {
    async fn read_page(
        &self,
        from: Version,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<EventEnvelope>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT no, event_id, event_name, payload, metadata, created_at FROM {} WHERE ",
            self.table_name
        ));

        if let Some(matcher) = &self.matcher {
            for condition in matcher.data() {
                push_metadata_condition(&mut builder, condition);
                builder.push(" AND ");
            }
        }

        match direction {
            Direction::Forward => {
                builder
                    .push("no >= ")
                    .push_bind(from.as_i64())
                    .push(" ORDER BY no ASC");
            }
            Direction::Backward => {
                builder
                    .push("no <= ")
                    .push_bind(from.as_i64())
                    .push(" ORDER BY no DESC");
            }
        }
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = self.store.fetch_all(builder.build()).await.map_err(|err| {
            tracing::debug!(error = %err, stream = %self.stream_name, "stream query failed");
            EventStoreError::StreamNotFound(self.stream_name.clone())
        })?;

        rows.iter()
            .map(|row| -> Result<EventEnvelope> {
                let stored = PostgresEventStore::row_to_stored(row)?;
                self.store.message_factory.create_message(stored)
            })
            .collect()
    }
}

/// Escapes `LIKE` wildcards so the input matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Appends one metadata condition.
///
/// Numbers compare as `numeric`, booleans as `jsonb`, everything else as
/// text. The field name is bound, never interpolated.
fn push_metadata_condition(builder: &mut QueryBuilder<'_, Postgres>, condition: &MetadataMatch) {
    let field = condition.field.clone();
    let op = condition.operator.as_sql();

    match (&condition.operator, &condition.value) {
        (Operator::In, Value::Array(values)) => {
            let values: Vec<String> = values.iter().map(json_text).collect();
            builder
                .push("metadata->>")
                .push_bind(field)
                .push(" = ANY(")
                .push_bind(values)
                .push(")");
        }
        (Operator::NotEquals, Value::Null) => {
            builder
                .push("metadata->>")
                .push_bind(field)
                .push(" IS NOT NULL");
        }
        (_, Value::Null) => {
            builder.push("metadata->>").push_bind(field).push(" IS NULL");
        }
        (_, Value::Bool(_)) => {
            builder
                .push("metadata->")
                .push_bind(field)
                .push(format!(" {op} "))
                .push_bind(condition.value.clone());
        }
        (_, Value::Number(n)) => {
            // Non-numeric values evaluate to NULL and drop out.
            builder
                .push("(CASE WHEN jsonb_typeof(metadata->")
                .push_bind(field.clone())
                .push(") = 'number' THEN (metadata->>")
                .push_bind(field)
                .push(format!(")::numeric END) {op} "))
                .push_bind(n.to_string())
                .push("::numeric");
        }
        (_, value) => {
            builder
                .push("metadata->>")
                .push_bind(field)
                .push(format!(" {op} "))
                .push_bind(json_text(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("foo-bar"), "foo-bar");
        assert_eq!(escape_like("a_b%c"), "a\\_b\\%c");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
    }
}
