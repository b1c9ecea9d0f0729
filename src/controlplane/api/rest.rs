//! Operator REST Handlers
//!
//! Read-only views of controller state for operators: liveness, readiness,
//! Prometheus metrics, the workflow task queue, docks and pools. Task
//! cancellation is the only write.

use crate::controlplane::orchestrator::Orchestrator;
use crate::controlplane::tasks::TaskInfo;
use crate::error::Error;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

// =============================================================================
// Response Types
// =============================================================================

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
}

impl ApiErrorResponse {
    fn from_error(err: &Error) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Readiness details
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub ready: bool,
    pub store_healthy: bool,
    pub docks_total: u64,
    pub docks_available: u64,
    pub active_tasks: usize,
}

// =============================================================================
// Router
// =============================================================================

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

/// Operator router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            .route("/healthz", get(health_check))
            .route("/readyz", get(readiness_check))
            .route("/metrics", get(metrics))
            .route("/v1/tasks", get(list_tasks))
            .route("/v1/tasks/:id", get(get_task).delete(cancel_task))
            .route("/v1/docks", get(list_docks))
            .route("/v1/pools", get(list_pools))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }
}

fn error_response(status: StatusCode, err: &Error) -> Response {
    (status, Json(ApiErrorResponse::from_error(err))).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Ready once the metadata store answers
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_healthy = state
        .orchestrator
        .catalog()
        .store()
        .health_check()
        .await
        .unwrap_or(false);
    let docks = state.orchestrator.docks().stats();
    let body = ReadinessResponse {
        ready: store_healthy,
        store_healthy,
        docks_total: docks.total_docks,
        docks_available: docks.available_docks,
        active_tasks: state.orchestrator.tasks().stats().active,
    };
    let status = if store_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn metrics(State(state): State<AppState>) -> Response {
    let docks = state.orchestrator.docks().stats();
    let metrics = state.orchestrator.metrics();
    metrics.set_docks(docks.total_docks, docks.available_docks);

    match metrics.render() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}

async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskInfo>> {
    Json(state.orchestrator.tasks().list())
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.orchestrator.tasks().get(&id) {
        Some(task) => (StatusCode::OK, Json(task)).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            &Error::NotFound(format!("task {}", id)),
        ),
    }
}

async fn cancel_task(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let tasks = state.orchestrator.tasks();
    if tasks.cancel(&id) {
        info!("Operator cancelled task {}", id);
        return StatusCode::ACCEPTED.into_response();
    }
    match tasks.get(&id) {
        Some(task) => {
            debug!("Task {} already finished", id);
            (StatusCode::CONFLICT, Json(task)).into_response()
        }
        None => error_response(
            StatusCode::NOT_FOUND,
            &Error::NotFound(format!("task {}", id)),
        ),
    }
}

async fn list_docks(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.docks().list())
}

async fn list_pools(State(state): State<AppState>) -> Response {
    match state.orchestrator.docks().pools().await {
        Ok(pools) => (StatusCode::OK, Json(pools)).into_response(),
        Err(e) => {
            error!("Failed to list pools: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &e)
        }
    }
}
