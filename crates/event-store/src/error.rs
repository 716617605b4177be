use thiserror::Error;

use crate::StreamName;

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream is absent from the catalog or its table does not exist.
    #[error("Stream not found: {0}")]
    StreamNotFound(StreamName),

    /// `create` targeted a stream name that is already cataloged.
    #[error("Stream already exists: {0}")]
    StreamExistsAlready(StreamName),

    /// An append lost a uniqueness race against another writer.
    ///
    /// Nothing from the losing call was written; the caller has to reload
    /// and decide whether to retry.
    #[error("Concurrency conflict while appending to stream {stream}")]
    Concurrency { stream: StreamName },

    #[error("Transaction already started")]
    TransactionAlreadyStarted,

    #[error("Transaction not started")]
    TransactionNotStarted,

    /// An unclassified backend failure.
    #[error("Error {code}. Error-Info: {message}")]
    Backend { code: String, message: String },

    /// The caller passed a structurally invalid request.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Wraps a statement failure, keeping its SQLSTATE code.
    ///
    /// Failures that never reached the database (pool, I/O, decoding) stay
    /// `Database` errors.
    pub fn backend(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => EventStoreError::Backend {
                code: db_err.code().map(|c| c.into_owned()).unwrap_or_default(),
                message: db_err.message().to_string(),
            },
            other => EventStoreError::Database(other),
        }
    }
}

impl From<common::InvalidName> for EventStoreError {
    fn from(err: common::InvalidName) -> Self {
        EventStoreError::InvalidArgument(err.to_string())
    }
}

/// Returns the SQLSTATE code of a database error, if any.
pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|c| c.into_owned()),
        _ => None,
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
