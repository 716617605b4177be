//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use projections::{CheckpointStore, InMemoryCheckpointStore, ProjectionName, ProjectionStatus};
use serde_json::Value;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

/// App over a checkpoint store seeded with the given projections.
async fn setup_with_projections(names: &[&str]) -> (axum::Router, InMemoryCheckpointStore) {
    let checkpoints = InMemoryCheckpointStore::new();
    for name in names {
        checkpoints
            .create_projection(&ProjectionName::new(*name).unwrap(), ProjectionStatus::Running)
            .await
            .unwrap();
    }

    let app = api::create_app(api::create_state(checkpoints.clone()), get_metrics_handle());
    (app, checkpoints)
}

async fn send(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn status_of(checkpoints: &InMemoryCheckpointStore, name: &str) -> Option<ProjectionStatus> {
    checkpoints
        .fetch_status(&ProjectionName::new(name).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup_with_projections(&[]).await;

    let (status, json) = send(app, "GET", "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup_with_projections(&[]).await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_list_projections() {
    let (app, _) = setup_with_projections(&["orders", "customers", "inventory"]).await;

    let (status, json) = send(app.clone(), "GET", "/projections").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json["projections"],
        serde_json::json!(["orders", "customers", "inventory"])
    );

    let (_, json) = send(app.clone(), "GET", "/projections?limit=1&offset=1").await;
    assert_eq!(json["projections"], serde_json::json!(["customers"]));

    let (_, json) = send(app, "GET", "/projections?filter=inventory").await;
    assert_eq!(json["projections"], serde_json::json!(["inventory"]));
}

#[tokio::test]
async fn test_list_projections_rejects_zero_limit() {
    let (app, _) = setup_with_projections(&["orders"]).await;

    let (status, json) = send(app, "GET", "/projections?limit=0").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

#[tokio::test]
async fn test_get_projection() {
    let (app, _) = setup_with_projections(&["orders"]).await;

    let (status, json) = send(app, "GET", "/projections/orders").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "orders");
    assert_eq!(json["status"], "running");
    assert_eq!(json["state"], serde_json::json!({}));
    assert_eq!(json["positions"], serde_json::json!({}));
}

#[tokio::test]
async fn test_get_unknown_projection() {
    let (app, _) = setup_with_projections(&[]).await;

    let (status, json) = send(app, "GET", "/projections/nope").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_stop_projection() {
    let (app, checkpoints) = setup_with_projections(&["orders"]).await;

    let (status, json) = send(app, "POST", "/projections/orders/stop").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["requested"], "stopping");
    assert_eq!(
        status_of(&checkpoints, "orders").await,
        Some(ProjectionStatus::Stopping)
    );
}

#[tokio::test]
async fn test_reset_projection() {
    let (app, checkpoints) = setup_with_projections(&["orders"]).await;

    let (status, _) = send(app, "POST", "/projections/orders/reset").await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(
        status_of(&checkpoints, "orders").await,
        Some(ProjectionStatus::Resetting)
    );
}

#[tokio::test]
async fn test_delete_projection() {
    let (app, checkpoints) = setup_with_projections(&["orders", "customers"]).await;

    let (status, json) = send(app.clone(), "POST", "/projections/orders/delete").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["requested"], "deleting");
    assert_eq!(
        status_of(&checkpoints, "orders").await,
        Some(ProjectionStatus::Deleting)
    );

    let (status, json) = send(
        app,
        "POST",
        "/projections/customers/delete?include_emitted_events=true",
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["requested"], "deleting incl emitted events");
    assert_eq!(
        status_of(&checkpoints, "customers").await,
        Some(ProjectionStatus::DeletingInclEmittedEvents)
    );
}

#[tokio::test]
async fn test_control_unknown_projection() {
    let (app, _) = setup_with_projections(&[]).await;

    let (status, _) = send(app, "POST", "/projections/nope/stop").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}
