use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::ProjectionName;
use tokio::sync::RwLock;

use crate::checkpoint::{Checkpoint, CheckpointStore, ProjectionDetails};
use crate::{ProjectionStatus, Result};

#[derive(Debug, Clone)]
struct Row {
    no: u64,
    checkpoint: Checkpoint,
    status: ProjectionStatus,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Rows {
    rows: HashMap<ProjectionName, Row>,
    next_no: u64,
}

/// In-memory checkpoint store for testing.
///
/// Clones share the same rows, so several runners in one process contend
/// for the same leases.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    inner: Arc<RwLock<Rows>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of projection rows.
    pub async fn projection_count(&self) -> usize {
        self.inner.read().await.rows.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_projection(
        &self,
        name: &ProjectionName,
        status: ProjectionStatus,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.rows.contains_key(name) {
            return Ok(());
        }
        inner.next_no += 1;
        let row = Row {
            no: inner.next_no,
            checkpoint: Checkpoint::default(),
            status,
            locked_until: None,
        };
        inner.rows.insert(name.clone(), row);
        Ok(())
    }

    async fn fetch_status(&self, name: &ProjectionName) -> Result<Option<ProjectionStatus>> {
        Ok(self.inner.read().await.rows.get(name).map(|row| row.status))
    }

    async fn acquire_lock(
        &self,
        name: &ProjectionName,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(row) = inner.rows.get_mut(name) else {
            return Ok(false);
        };
        if row.locked_until.is_some_and(|until| until >= now) {
            return Ok(false);
        }
        row.locked_until = Some(locked_until);
        row.status = ProjectionStatus::Running;
        Ok(true)
    }

    async fn release_lock(&self, name: &ProjectionName) -> Result<()> {
        if let Some(row) = self.inner.write().await.rows.get_mut(name) {
            row.locked_until = None;
            row.status = ProjectionStatus::Idle;
        }
        Ok(())
    }

    async fn persist(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        locked_until: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(row) = self.inner.write().await.rows.get_mut(name) {
            row.checkpoint = checkpoint.clone();
            row.locked_until = Some(locked_until);
        }
        Ok(())
    }

    async fn load(&self, name: &ProjectionName) -> Result<Option<Checkpoint>> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(name)
            .map(|row| row.checkpoint.clone()))
    }

    async fn reset(
        &self,
        name: &ProjectionName,
        checkpoint: &Checkpoint,
        status: ProjectionStatus,
    ) -> Result<()> {
        if let Some(row) = self.inner.write().await.rows.get_mut(name) {
            row.checkpoint = checkpoint.clone();
            row.status = status;
        }
        Ok(())
    }

    async fn update_status(
        &self,
        name: &ProjectionName,
        status: ProjectionStatus,
    ) -> Result<bool> {
        match self.inner.write().await.rows.get_mut(name) {
            Some(row) => {
                row.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, name: &ProjectionName) -> Result<bool> {
        Ok(self.inner.write().await.rows.remove(name).is_some())
    }

    async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProjectionName>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<_> = inner
            .rows
            .iter()
            .filter(|(name, _)| filter.is_none_or(|f| name.as_str() == f))
            .map(|(name, row)| (row.no, name.clone()))
            .collect();
        rows.sort_by_key(|(no, _)| *no);

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, name)| name)
            .collect())
    }

    async fn fetch_projection_details(
        &self,
        name: &ProjectionName,
    ) -> Result<Option<ProjectionDetails>> {
        Ok(self
            .inner
            .read()
            .await
            .rows
            .get(name)
            .map(|row| ProjectionDetails {
                name: name.clone(),
                status: row.status,
                positions: row.checkpoint.positions.clone(),
                state: row.checkpoint.state.clone(),
                locked_until: row.locked_until,
            }))
    }
}
