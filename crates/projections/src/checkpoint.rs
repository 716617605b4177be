//! Durable projection checkpoints and the control row around them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProjectionName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ProjectionStatus, Result};

/// Per-stream positions and folded state of a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last processed `no` per tracked stream.
    pub positions: BTreeMap<String, i64>,
    /// Always a JSON object.
    pub state: Value,
}

impl Checkpoint {
    pub fn new(positions: BTreeMap<String, i64>, state: Value) -> Self {
        Self { positions, state }
    }
}

impl Default for Checkpoint {
    fn default() -> Self {
        Self {
            positions: BTreeMap::new(),
            state: empty_state(),
        }
    }
}

/// `{}`
pub fn empty_state() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Everything stored for one projection, as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionDetails {
    pub name: ProjectionName,
    pub status: ProjectionStatus,
    pub positions: BTreeMap<String, i64>,
    pub state: Value,
    pub locked_until: Option<DateTime<Utc>>,
}

/// Storage for projection rows: checkpoint, status and lease.
///
/// One row per projection name. Every method is a single statement against
/// that row, so implementations need no transactions.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Inserts an empty row; an existing row is left untouched.
    async fn create_projection(&self, name: &ProjectionName, status: ProjectionStatus)
    -> Result<()>;

    /// `None` when there is no row.
    async fn fetch_status(&self, name: &ProjectionName) -> Result<Option<ProjectionStatus>>;

    /// Takes the lease when it is free or expired at `now`, marking the row
    /// running. Returns whether the lease was taken.
    async fn acquire_lock(
        &self,
        name: &ProjectionName,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool>;

    /// Clears the lease and marks the row idle.
    async fn release_lock(&self, name: &ProjectionName) -> Result<()>;

    /// Writes positions and state, renewing the lease.
    async fn persist(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        locked_until: DateTime<Utc>,
    ) -> Result<()>;

    async fn load(&self, name: &ProjectionName) -> Result<Option<Checkpoint>>;

    /// Overwrites positions, state and status.
    async fn reset(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        status: ProjectionStatus,
    ) -> Result<()>;

    /// Returns `false` when there is no row.
    async fn update_status(&self, name: &ProjectionName, status: ProjectionStatus)
    -> Result<bool>;

    /// Returns `false` when there is no row.
    async fn delete(&self, name: &ProjectionName) -> Result<bool>;

    /// Names in creation order, optionally restricted to an exact name.
    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProjectionName>>;

    async fn fetch_projection_details(
        &self,
        name: &ProjectionName,
    ) -> Result<Option<ProjectionDetails>>;
}
