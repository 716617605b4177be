//! Projection inspection and control endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use projections::{
    CheckpointStore, ProjectionDetails, ProjectionManager, ProjectionName, ProjectionStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

const DEFAULT_PAGE_SIZE: usize = 20;

/// Shared application state accessible from all handlers.
pub struct AppState<C: CheckpointStore> {
    pub manager: ProjectionManager<C>,
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub filter: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub include_emitted_events: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct ProjectionListResponse {
    pub projections: Vec<ProjectionName>,
}

#[derive(Serialize)]
pub struct ProjectionResponse {
    pub name: ProjectionName,
    pub status: ProjectionStatus,
    pub state: Value,
    pub positions: BTreeMap<String, i64>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl From<ProjectionDetails> for ProjectionResponse {
    fn from(details: ProjectionDetails) -> Self {
        Self {
            name: details.name,
            status: details.status,
            state: details.state,
            positions: details.positions,
            locked_until: details.locked_until,
        }
    }
}

#[derive(Serialize)]
pub struct StatusRequestedResponse {
    pub name: ProjectionName,
    pub requested: ProjectionStatus,
}

// -- Handlers --

/// GET /projections: lists projection names in creation order.
pub async fn list<C: CheckpointStore>(
    State(state): State<Arc<AppState<C>>>,
    Query(params): Query<ListParams>,
) -> Result<Json<ProjectionListResponse>, ApiError> {
    let projections = state
        .manager
        .fetch_projection_names(
            params.filter.as_deref(),
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            params.offset.unwrap_or(0),
        )
        .await?;

    Ok(Json(ProjectionListResponse { projections }))
}

/// GET /projections/{name}: status, state and positions of one projection.
pub async fn get<C: CheckpointStore>(
    State(state): State<Arc<AppState<C>>>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionResponse>, ApiError> {
    let name = ProjectionName::new(name)?;
    let details = state.manager.fetch_projection_details(&name).await?;
    Ok(Json(details.into()))
}

/// POST /projections/{name}/stop
pub async fn stop<C: CheckpointStore>(
    State(state): State<Arc<AppState<C>>>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<StatusRequestedResponse>), ApiError> {
    let name = ProjectionName::new(name)?;
    state.manager.stop_projection(&name).await?;
    Ok(accepted(name, ProjectionStatus::Stopping))
}

/// POST /projections/{name}/reset
pub async fn reset<C: CheckpointStore>(
    State(state): State<Arc<AppState<C>>>,
    Path(name): Path<String>,
) -> Result<(StatusCode, Json<StatusRequestedResponse>), ApiError> {
    let name = ProjectionName::new(name)?;
    state.manager.reset_projection(&name).await?;
    Ok(accepted(name, ProjectionStatus::Resetting))
}

/// POST /projections/{name}/delete?include_emitted_events=bool
pub async fn delete<C: CheckpointStore>(
    State(state): State<Arc<AppState<C>>>,
    Path(name): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<(StatusCode, Json<StatusRequestedResponse>), ApiError> {
    let name = ProjectionName::new(name)?;
    state
        .manager
        .delete_projection(&name, params.include_emitted_events)
        .await?;

    let requested = if params.include_emitted_events {
        ProjectionStatus::DeletingInclEmittedEvents
    } else {
        ProjectionStatus::Deleting
    };
    Ok(accepted(name, requested))
}

fn accepted(
    name: ProjectionName,
    requested: ProjectionStatus,
) -> (StatusCode, Json<StatusRequestedResponse>) {
    metrics::counter!("api_projection_control_requests", "status" => requested.as_str())
        .increment(1);
    (
        StatusCode::ACCEPTED,
        Json(StatusRequestedResponse { name, requested }),
    )
}
