//! Read model projections over the event store.
//!
//! - [`ReadModelProjector`] tails streams, folds events into state and a
//!   [`ReadModel`], and checkpoints progress
//! - [`CheckpointStore`] keeps positions, state, status and the runner lease
//! - [`ProjectionManager`] lets operators stop, reset and delete projections

pub mod checkpoint;
pub mod context;
pub mod error;
pub mod manager;
pub mod memory;
pub mod options;
pub mod postgres;
pub mod projector;
pub mod read_model;
pub mod status;

pub use checkpoint::{Checkpoint, CheckpointStore, ProjectionDetails};
pub use common::ProjectionName;
pub use context::HandlerContext;
pub use error::{ProjectionError, Result};
pub use manager::ProjectionManager;
pub use memory::InMemoryCheckpointStore;
pub use options::ProjectorOptions;
pub use postgres::PostgresCheckpointStore;
pub use projector::{Handler, ReadModelProjector, handler};
pub use read_model::ReadModel;
pub use status::ProjectionStatus;
