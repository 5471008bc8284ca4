//! Run API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use harvestline_core::{OrchestratorError, RunRecord};

use crate::state::AppState;

// ============================================================================
// Response Types
// ============================================================================

/// Response for listing runs
#[derive(Debug, Serialize)]
pub struct ListRunsResponse {
    pub runs: Vec<RunRecord>,
    /// Run currently holding the sessions
    pub active: Option<Uuid>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct RunErrorResponse {
    pub error: String,
}

/// Simple message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(RunErrorResponse { error: message })).into_response()
}

fn orchestrator_error(err: OrchestratorError) -> Response {
    let status = match &err {
        OrchestratorError::RunNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::RunActive(_) | OrchestratorError::AlreadyFinished(_) => {
            StatusCode::CONFLICT
        }
        OrchestratorError::Preflight(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error_response(status, err.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// Start a pipeline run over all enabled sessions
pub async fn start_run(State(state): State<Arc<AppState>>) -> Response {
    let id = match state.runs().start_run() {
        Ok(id) => id,
        Err(e) => return orchestrator_error(e),
    };
    match state.runs().get_run(id) {
        Some(record) => (StatusCode::ACCEPTED, Json(record)).into_response(),
        None => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("run {} vanished after start", id),
        ),
    }
}

/// List all runs, newest first
pub async fn list_runs(State(state): State<Arc<AppState>>) -> Json<ListRunsResponse> {
    Json(ListRunsResponse {
        runs: state.runs().list_runs(),
        active: state.runs().active_run(),
    })
}

/// Get a run by ID
pub async fn get_run(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.runs().get_run(id) {
        Some(record) => Json(record).into_response(),
        None => orchestrator_error(OrchestratorError::RunNotFound(id)),
    }
}

/// Request cancellation of a running run
pub async fn cancel_run(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    match state.runs().cancel_run(id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(MessageResponse {
                message: format!("cancellation requested for run {}", id),
            }),
        )
            .into_response(),
        Err(e) => orchestrator_error(e),
    }
}
