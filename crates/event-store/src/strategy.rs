//! Physical layouts for stream tables.
//!
//! A [`PersistenceStrategy`] decides how a logical stream maps onto a
//! PostgreSQL table: its name, its DDL, the column set of an event row and
//! which SQLSTATE codes signal a uniqueness conflict. The store itself is
//! agnostic to the layout.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{EventEnvelope, EventStoreError, Result, StreamName};

/// SQLSTATE codes PostgreSQL reports for integrity/unique violations.
pub const POSTGRES_UNIQUE_VIOLATION_CODES: &[&str] = &["23000", "23505"];

/// A single bindable column value of an event row.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Json(serde_json::Value),
    Timestamp(DateTime<Utc>),
}

/// Maps streams to tables and events to rows.
pub trait PersistenceStrategy: Send + Sync + std::fmt::Debug {
    /// Physical table identifier for a stream.
    fn table_name(&self, stream_name: &StreamName) -> String {
        hashed_table_name(stream_name)
    }

    /// Ordered list of the columns an event row occupies.
    fn column_names(&self) -> &'static [&'static str];

    /// DDL statements creating the table for one stream.
    fn create_schema(&self, table_name: &str) -> Vec<String>;

    /// Backend error codes meaning "uniqueness conflict".
    fn unique_violation_codes(&self) -> &'static [&'static str] {
        POSTGRES_UNIQUE_VIOLATION_CODES
    }

    fn is_unique_violation(&self, code: &str) -> bool {
        self.unique_violation_codes().contains(&code)
    }

    /// Rows in `column_names()` order, one per event.
    fn prepare_rows(&self, events: &[EventEnvelope]) -> Result<Vec<Vec<ColumnValue>>>;
}

/// `_` followed by the first 40 hex digits of the SHA-256 of the stream name.
///
/// Keeps arbitrary stream names inside PostgreSQL's identifier rules.
pub fn hashed_table_name(stream_name: &StreamName) -> String {
    let digest = Sha256::digest(stream_name.as_str().as_bytes());
    let hex = hex::encode(digest);
    format!("_{}", &hex[..40])
}

fn common_columns(event: &EventEnvelope) -> Result<[ColumnValue; 5]> {
    Ok([
        ColumnValue::Uuid(event.event_id.as_uuid()),
        ColumnValue::Text(event.event_name.clone()),
        ColumnValue::Json(event.payload.clone()),
        ColumnValue::Json(serde_json::to_value(&event.metadata)?),
        ColumnValue::Timestamp(event.created_at),
    ])
}

const SERIAL_COLUMNS: &[&str] = &["event_id", "event_name", "payload", "metadata", "created_at"];

/// One table per aggregate; `no` is the aggregate version.
///
/// Two writers appending the same next version collide on the primary key,
/// which is what makes expected-version checks work without locking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateStreamStrategy;

impl PersistenceStrategy for AggregateStreamStrategy {
    fn column_names(&self) -> &'static [&'static str] {
        &[
            "no",
            "event_id",
            "event_name",
            "payload",
            "metadata",
            "created_at",
        ]
    }

    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            r#"CREATE TABLE {table_name} (
    no BIGINT NOT NULL,
    event_id UUID NOT NULL,
    event_name VARCHAR(100) NOT NULL,
    payload JSONB NOT NULL,
    metadata JSONB NOT NULL,
    created_at TIMESTAMPTZ(6) NOT NULL,
    PRIMARY KEY (no),
    CONSTRAINT aggregate_version_not_null CHECK ((metadata->>'_aggregate_version') IS NOT NULL),
    CONSTRAINT aggregate_type_not_null CHECK ((metadata->>'_aggregate_type') IS NOT NULL),
    CONSTRAINT aggregate_id_not_null CHECK ((metadata->>'_aggregate_id') IS NOT NULL),
    UNIQUE (event_id)
)"#
        )]
    }

    fn prepare_rows(&self, events: &[EventEnvelope]) -> Result<Vec<Vec<ColumnValue>>> {
        events
            .iter()
            .map(|event| -> Result<Vec<ColumnValue>> {
                let version = event.aggregate_version().ok_or_else(|| {
                    EventStoreError::InvalidArgument(format!(
                        "event {} has no integer _aggregate_version metadata",
                        event.event_id
                    ))
                })?;
                let mut row = vec![ColumnValue::Int(version.as_i64())];
                row.extend(common_columns(event)?);
                Ok(row)
            })
            .collect()
    }
}

/// Many aggregates in one stream table; `no` is a serial.
///
/// Uniqueness is enforced on `(aggregate type, aggregate id, aggregate
/// version)` taken from the metadata, plus the event id.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleStreamStrategy;

impl PersistenceStrategy for SingleStreamStrategy {
    fn column_names(&self) -> &'static [&'static str] {
        SERIAL_COLUMNS
    }

    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![
            format!(
                r#"CREATE TABLE {table_name} (
    no BIGSERIAL,
    event_id UUID NOT NULL,
    event_name VARCHAR(100) NOT NULL,
    payload JSONB NOT NULL,
    metadata JSONB NOT NULL,
    created_at TIMESTAMPTZ(6) NOT NULL,
    PRIMARY KEY (no),
    CONSTRAINT aggregate_version_not_null CHECK ((metadata->>'_aggregate_version') IS NOT NULL),
    CONSTRAINT aggregate_type_not_null CHECK ((metadata->>'_aggregate_type') IS NOT NULL),
    CONSTRAINT aggregate_id_not_null CHECK ((metadata->>'_aggregate_id') IS NOT NULL),
    UNIQUE (event_id)
)"#
            ),
            format!(
                "CREATE UNIQUE INDEX ON {table_name} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'), (metadata->>'_aggregate_version'))"
            ),
            format!(
                "CREATE INDEX ON {table_name} \
                 ((metadata->>'_aggregate_type'), (metadata->>'_aggregate_id'), no)"
            ),
        ]
    }

    fn prepare_rows(&self, events: &[EventEnvelope]) -> Result<Vec<Vec<ColumnValue>>> {
        events
            .iter()
            .map(|event| -> Result<Vec<ColumnValue>> { Ok(common_columns(event)?.to_vec()) })
            .collect()
    }
}

/// One table per stream, serial `no`, event id as the only unique key.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleStreamStrategy;

impl PersistenceStrategy for SimpleStreamStrategy {
    fn column_names(&self) -> &'static [&'static str] {
        SERIAL_COLUMNS
    }

    fn create_schema(&self, table_name: &str) -> Vec<String> {
        vec![format!(
            r#"CREATE TABLE {table_name} (
    no BIGSERIAL,
    event_id UUID NOT NULL,
    event_name VARCHAR(100) NOT NULL,
    payload JSONB NOT NULL,
    metadata JSONB NOT NULL,
    created_at TIMESTAMPTZ(6) NOT NULL,
    PRIMARY KEY (no),
    UNIQUE (event_id)
)"#
        )]
    }

    fn prepare_rows(&self, events: &[EventEnvelope]) -> Result<Vec<Vec<ColumnValue>>> {
        events
            .iter()
            .map(|event| -> Result<Vec<ColumnValue>> { Ok(common_columns(event)?.to_vec()) })
            .collect()
    }
}
