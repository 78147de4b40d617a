//! HTTP request handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::scheduler::TriggerOutcome;

fn internal_error(err: impl std::fmt::Display) -> Response {
    tracing::error!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal error"})),
    )
        .into_response()
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// List all watches, soft-deleted ones excluded.
pub async fn list_watches(State(state): State<AppState>) -> Response {
    match state.db.watches().get_all().await {
        Ok(watches) => Json(json!({"watches": watches})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct RunListParams {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    20
}

/// Recent runs for one watch, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Path(watch_id): Path<String>,
    Query(params): Query<RunListParams>,
) -> Response {
    match state.db.watches().get(&watch_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "watch not found"})),
            )
                .into_response();
        }
        Err(err) => return internal_error(err),
    }

    match state.db.runs().recent_for_watch(&watch_id, params.limit).await {
        Ok(runs) => Json(json!({"runs": runs})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventListParams {
    pub watch_id: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

/// Recent events, optionally narrowed to one watch.
pub async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventListParams>,
) -> Response {
    match state
        .db
        .events()
        .recent(params.watch_id.as_deref(), params.limit)
        .await
    {
        Ok(events) => Json(json!({"events": events})).into_response(),
        Err(err) => internal_error(err),
    }
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    run_id: String,
}

/// Kick off a run outside the schedule.
///
/// 202 with the run id when claimed, 409 when a run is already in
/// flight, 422 when the watch is paused or errored, 404 when unknown.
pub async fn trigger_watch(
    State(state): State<AppState>,
    Path(watch_id): Path<String>,
) -> Response {
    match state.executor.trigger(&watch_id).await {
        Ok(TriggerOutcome::Accepted { run_id }) => {
            (StatusCode::ACCEPTED, Json(TriggerResponse { run_id })).into_response()
        }
        Ok(TriggerOutcome::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "a run is already in flight"})),
        )
            .into_response(),
        Ok(TriggerOutcome::NotSchedulable) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "watch is not active"})),
        )
            .into_response(),
        Ok(TriggerOutcome::NotFound) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "watch not found"})),
        )
            .into_response(),
        Err(err) => internal_error(err),
    }
}
