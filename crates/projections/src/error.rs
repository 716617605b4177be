//! Projection error types.

use common::ProjectionName;
use thiserror::Error;

/// Errors that can occur while configuring, running or controlling projections.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// The lease on the checkpoint row is held by another runner.
    #[error("Another projection process is already running: {0}")]
    LockContention(ProjectionName),

    #[error("Projection already initialized")]
    AlreadyInitialized,

    #[error("Projection query already configured")]
    QueryAlreadyConfigured,

    #[error("Projection handlers already configured")]
    HandlersAlreadyConfigured,

    /// `run` was called before a query and handlers were set.
    #[error("Projection not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Projection not found: {0}")]
    ProjectionNotFound(ProjectionName),

    /// The status column holds a value outside the known set.
    #[error("Unknown projection status: {0}")]
    UnknownStatus(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to (de)serialize a checkpoint.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Raised by a read model implementation.
    #[error("Read model error: {0}")]
    ReadModel(String),
}

impl From<common::InvalidName> for ProjectionError {
    fn from(err: common::InvalidName) -> Self {
        ProjectionError::InvalidArgument(err.to_string())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
