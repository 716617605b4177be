//! Operator-side control of projections through their status rows.

use std::collections::BTreeMap;

use common::ProjectionName;
use serde_json::Value;

use crate::checkpoint::{CheckpointStore, ProjectionDetails};
use crate::{ProjectionError, ProjectionStatus, Result};

/// Requests state changes from running projectors and inspects their rows.
///
/// Requests are asynchronous: a projector acts on them at its next status
/// poll, or at the start of its next run.
#[derive(Debug, Clone)]
pub struct ProjectionManager<C> {
    checkpoints: C,
}

impl<C: CheckpointStore> ProjectionManager<C> {
    pub fn new(checkpoints: C) -> Self {
        Self { checkpoints }
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    #[tracing::instrument(skip(self))]
    pub async fn stop_projection(&self, name: &ProjectionName) -> Result<()> {
        self.request(name, ProjectionStatus::Stopping).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn reset_projection(&self, name: &ProjectionName) -> Result<()> {
        self.request(name, ProjectionStatus::Resetting).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_projection(
        &self,
        name: &ProjectionName,
        delete_emitted_events: bool,
    ) -> Result<()> {
        let status = if delete_emitted_events {
            ProjectionStatus::DeletingInclEmittedEvents
        } else {
            ProjectionStatus::Deleting
        };
        self.request(name, status).await
    }

    async fn request(&self, name: &ProjectionName, status: ProjectionStatus) -> Result<()> {
        if !self.checkpoints.update_status(name, status).await? {
            return Err(ProjectionError::ProjectionNotFound(name.clone()));
        }
        tracing::info!(projection = %name, %status, "projection status requested");
        Ok(())
    }

    pub async fn fetch_projection_status(&self, name: &ProjectionName) -> Result<ProjectionStatus> {
        self.checkpoints
            .fetch_status(name)
            .await?
            .ok_or_else(|| ProjectionError::ProjectionNotFound(name.clone()))
    }

    pub async fn fetch_projection_state(&self, name: &ProjectionName) -> Result<Value> {
        Ok(self.fetch_projection_details(name).await?.state)
    }

    pub async fn fetch_projection_positions(
        &self,
        name: &ProjectionName,
    ) -> Result<BTreeMap<String, i64>> {
        Ok(self.fetch_projection_details(name).await?.positions)
    }

    pub async fn fetch_projection_details(&self, name: &ProjectionName) -> Result<ProjectionDetails> {
        self.checkpoints
            .fetch_projection_details(name)
            .await?
            .ok_or_else(|| ProjectionError::ProjectionNotFound(name.clone()))
    }

    pub async fn fetch_projection_names(
        &self,
        filter: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ProjectionName>> {
        if limit < 1 {
            return Err(ProjectionError::InvalidArgument(
                "limit must be at least 1".to_string(),
            ));
        }
        self.checkpoints
            .fetch_projection_names(filter, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCheckpointStore;

    fn name(s: &str) -> ProjectionName {
        ProjectionName::new(s).unwrap()
    }

    #[tokio::test]
    async fn requests_write_status() {
        let store = InMemoryCheckpointStore::new();
        store
            .create_projection(&name("p"), ProjectionStatus::Running)
            .await
            .unwrap();
        let manager = ProjectionManager::new(store);

        manager.stop_projection(&name("p")).await.unwrap();
        assert_eq!(
            manager.fetch_projection_status(&name("p")).await.unwrap(),
            ProjectionStatus::Stopping
        );

        manager.delete_projection(&name("p"), true).await.unwrap();
        assert_eq!(
            manager.fetch_projection_status(&name("p")).await.unwrap(),
            ProjectionStatus::DeletingInclEmittedEvents
        );
    }

    #[tokio::test]
    async fn unknown_projection_is_not_found() {
        let manager = ProjectionManager::new(InMemoryCheckpointStore::new());

        assert!(matches!(
            manager.reset_projection(&name("missing")).await,
            Err(ProjectionError::ProjectionNotFound(_))
        ));
        assert!(matches!(
            manager.fetch_projection_state(&name("missing")).await,
            Err(ProjectionError::ProjectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn zero_limit_is_rejected() {
        let manager = ProjectionManager::new(InMemoryCheckpointStore::new());
        assert!(matches!(
            manager.fetch_projection_names(None, 0, 0).await,
            Err(ProjectionError::InvalidArgument(_))
        ));
    }
}
