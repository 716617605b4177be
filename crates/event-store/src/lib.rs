//! Stream-per-table event store on PostgreSQL.
//!
//! Every stream is cataloged in a shared table and stored in its own table,
//! whose layout is chosen by a [`PersistenceStrategy`].

pub mod config;
pub mod error;
pub mod event;
pub mod iterator;
pub mod memory;
pub mod message;
pub mod metadata;
pub mod postgres;
pub mod store;
pub mod strategy;
pub mod stream;

pub use common::StreamName;
pub use config::EventStoreConfig;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use message::{EnvelopeMessageFactory, MessageFactory, StoredEvent};
pub use metadata::{MetadataMatch, MetadataMatcher, Operator};
pub use postgres::PostgresEventStore;
pub use store::{
    EventStore, EventStoreExt, EventStream, TransactionalEventStore, TransactionalEventStoreExt,
};
pub use strategy::{
    AggregateStreamStrategy, ColumnValue, PersistenceStrategy, SimpleStreamStrategy,
    SingleStreamStrategy,
};
pub use stream::Stream;
