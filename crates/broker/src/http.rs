// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP request/response types and axum handler implementations.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_layer;
use crate::error::ErrorCode;
use crate::model::{epoch_ms, Decision, DetectionSource, ProjectSpec, TaskSpec, TaskState};
use crate::store::Store;

/// Longest respond long-poll the broker will hold open.
const RESPOND_POLL_CAP: Duration = Duration::from_secs(25);

// -- Request bodies -----------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertRequest {
    pub project: ProjectSpec,
    pub task: TaskSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRequest {
    pub task_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub source: Option<DetectionSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailsRequest {
    pub task_id: String,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneRequest {
    pub task_id: String,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRequest {
    pub task_id: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugUpdateRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    pub debug_data: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondRequest {
    pub task_id: String,
    pub request_id: u64,
    pub decision: Decision,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RespondPollQuery {
    /// Long-poll timeout in milliseconds (capped server-side).
    #[serde(default = "default_poll_ms", rename = "timeoutMs")]
    pub timeout_ms: u64,
}

fn default_poll_ms() -> u64 {
    RESPOND_POLL_CAP.as_millis() as u64
}

// -- Router -------------------------------------------------------------------

/// Build the broker router with auth, CORS, and trace layers applied.
pub fn build_router(store: Arc<Store>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/state", get(state_snapshot))
        .route("/v1/cli-connectivity", get(cli_connectivity))
        .route("/v1/tasks/upsert", post(tasks_upsert))
        .route("/v1/tasks/state", post(tasks_state))
        .route("/v1/tasks/details", post(tasks_details))
        .route("/v1/tasks/done", post(tasks_done))
        .route("/v1/tasks/pin", post(tasks_pin))
        .route("/v1/tasks/respond", post(tasks_respond))
        .route("/v1/tasks/{id}", delete(tasks_delete))
        .route("/v1/tasks/{id}/respond", get(tasks_respond_poll))
        .route("/v1/hooks/state", post(hooks_state))
        .route("/v1/debug/update", post(debug_update))
        .route("/v1/debug/{id}", get(debug_get))
        .route("/v1/events", get(crate::ws::events_handler))
        .layer(middleware::from_fn_with_state(Arc::clone(&store), auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

// -- Handlers -----------------------------------------------------------------

/// `GET /v1/health` — unauthenticated liveness probe.
pub async fn health(State(s): State<Arc<Store>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "currentTime": epoch_ms(),
        "lastCliPing": s.last_cli_ping(),
    }))
}

/// `GET /v1/state` — full store snapshot.
pub async fn state_snapshot(State(s): State<Arc<Store>>) -> impl IntoResponse {
    Json(s.snapshot().await)
}

/// `GET /v1/cli-connectivity` — whether a wrapper pinged us recently.
pub async fn cli_connectivity(State(s): State<Arc<Store>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "connected": s.cli_connected(),
        "lastPing": s.last_cli_ping(),
        "currentTime": epoch_ms(),
    }))
}

/// `POST /v1/tasks/upsert` — create/update a project and task pair.
pub async fn tasks_upsert(
    State(s): State<Arc<Store>>,
    Json(req): Json<UpsertRequest>,
) -> Response {
    match s.upsert(req.project, req.task).await {
        Ok((project, task)) => {
            Json(serde_json::json!({ "project": project, "task": task })).into_response()
        }
        Err(code) => code.to_response("upsert rejected"),
    }
}

/// `POST /v1/tasks/state` — apply a state change from a wrapper.
pub async fn tasks_state(State(s): State<Arc<Store>>, Json(req): Json<StateRequest>) -> Response {
    match s.set_state(&req.task_id, req.state, req.details, req.source).await {
        Ok(task) => Json(task).into_response(),
        Err(code) => code.to_response(format!("state change rejected for {}", req.task_id)),
    }
}

/// `POST /v1/tasks/details` — update details only.
pub async fn tasks_details(
    State(s): State<Arc<Store>>,
    Json(req): Json<DetailsRequest>,
) -> Response {
    match s.set_details(&req.task_id, req.details).await {
        Ok(task) => Json(task).into_response(),
        Err(code) => code.to_response(format!("details rejected for {}", req.task_id)),
    }
}

/// `POST /v1/tasks/done` — mark a task DONE.
pub async fn tasks_done(State(s): State<Arc<Store>>, Json(req): Json<DoneRequest>) -> Response {
    match s.done(&req.task_id, req.details).await {
        Ok(task) => Json(task).into_response(),
        Err(code) => code.to_response(format!("done rejected for {}", req.task_id)),
    }
}

/// `POST /v1/tasks/pin` — UI pin/unpin, allowed in any state.
pub async fn tasks_pin(State(s): State<Arc<Store>>, Json(req): Json<PinRequest>) -> Response {
    match s.pin(&req.task_id, req.pinned).await {
        Ok(task) => Json(task).into_response(),
        Err(code) => code.to_response(format!("unknown task {}", req.task_id)),
    }
}

/// `DELETE /v1/tasks/{id}` — UI prune.
pub async fn tasks_delete(State(s): State<Arc<Store>>, Path(id): Path<String>) -> Response {
    match s.remove(&id).await {
        Ok(()) => Json(serde_json::json!({ "removed": true })).into_response(),
        Err(code) => code.to_response(format!("unknown task {id}")),
    }
}

/// `POST /v1/tasks/respond` — UI verdict for an outstanding approval.
pub async fn tasks_respond(
    State(s): State<Arc<Store>>,
    Json(req): Json<RespondRequest>,
) -> Response {
    match s.submit_decision(&req.task_id, req.request_id, req.decision).await {
        Ok(()) => Json(serde_json::json!({ "accepted": true })).into_response(),
        Err(code) => code.to_response(format!("unknown task {}", req.task_id)),
    }
}

/// `GET /v1/tasks/{id}/respond` — wrapper long-poll for a UI decision.
///
/// Returns 204 when the poll window elapses without a verdict; the wrapper
/// keeps the child's tool call blocked and polls again.
pub async fn tasks_respond_poll(
    State(s): State<Arc<Store>>,
    Path(id): Path<String>,
    Query(q): Query<RespondPollQuery>,
) -> Response {
    if s.get_task(&id).await.is_none() {
        return ErrorCode::NotFound.to_response(format!("unknown task {id}"));
    }
    let timeout = Duration::from_millis(q.timeout_ms).min(RESPOND_POLL_CAP);
    match s.poll_decision(&id, timeout).await {
        Some(decision) => Json(decision).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `POST /v1/hooks/state` — state ingress from an in-agent callback.
///
/// Hook signals carry high confidence; the source is forced to `hook`.
pub async fn hooks_state(State(s): State<Arc<Store>>, Json(req): Json<StateRequest>) -> Response {
    match s.set_state(&req.task_id, req.state, req.details, Some(DetectionSource::Hook)).await {
        Ok(task) => Json(task).into_response(),
        Err(code) => code.to_response(format!("hook state rejected for {}", req.task_id)),
    }
}

/// `POST /v1/debug/update` — store a per-task diagnostic snapshot.
pub async fn debug_update(
    State(s): State<Arc<Store>>,
    Json(req): Json<DebugUpdateRequest>,
) -> Response {
    let key = req.task_id.unwrap_or_else(|| "global".to_owned());
    s.debug_update(key, req.debug_data).await;
    Json(serde_json::json!({ "stored": true })).into_response()
}

/// `GET /v1/debug/{id}` — fetch a stored diagnostic snapshot.
pub async fn debug_get(State(s): State<Arc<Store>>, Path(id): Path<String>) -> Response {
    match s.debug_get(&id).await {
        Some(data) => Json(data).into_response(),
        None => ErrorCode::NotFound.to_response(format!("no debug snapshot for {id}")),
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
