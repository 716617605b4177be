//! Operator HTTP API for projections.
//!
//! Exposes projection status, state and positions, accepts stop, reset and
//! delete requests, and serves health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{CheckpointStore, ProjectionManager};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::projections::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<C: CheckpointStore + 'static>(
    state: Arc<AppState<C>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/projections", get(routes::projections::list::<C>))
        .route("/projections/{name}", get(routes::projections::get::<C>))
        .route(
            "/projections/{name}/stop",
            post(routes::projections::stop::<C>),
        )
        .route(
            "/projections/{name}/reset",
            post(routes::projections::reset::<C>),
        )
        .route(
            "/projections/{name}/delete",
            post(routes::projections::delete::<C>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a checkpoint store into the shared application state.
pub fn create_state<C: CheckpointStore>(checkpoints: C) -> Arc<AppState<C>> {
    Arc::new(AppState {
        manager: ProjectionManager::new(checkpoints),
    })
}
