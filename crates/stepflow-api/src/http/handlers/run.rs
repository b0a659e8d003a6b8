//! Run execution and inspection handlers for the REST API.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stepflow_types::graph::Context;
use stepflow_types::run::{RunFailure, RunMode, RunSnapshot, RunStatus};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/runs`.
#[derive(Debug, Deserialize)]
pub struct StartRunRequest {
    pub graph_id: String,
    #[serde(default)]
    pub initial_context: Context,
    /// Return immediately and execute on a background task.
    #[serde(default)]
    pub background: bool,
}

/// Query parameters for listing runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub graph_id: Option<String>,
}

/// A run without its log history.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub graph_id: String,
    pub status: RunStatus,
    pub current_node: Option<String>,
    pub steps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<RunSnapshot> for RunSummary {
    fn from(run: RunSnapshot) -> Self {
        Self {
            id: run.id,
            graph_id: run.graph_id,
            status: run.status,
            current_node: run.current_node,
            steps: run.steps,
            failure: run.failure,
            created_at: run.created_at,
            finished_at: run.finished_at,
        }
    }
}

/// Response of `POST /api/v1/runs/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub run_id: Uuid,
    /// Status when the request arrived; the run stops at its next safe point.
    pub status: RunStatus,
    pub cancel_requested: bool,
}

fn run_links<T: Serialize>(resp: ApiResponse<T>, run_id: Uuid) -> ApiResponse<T> {
    resp.with_link("self", format!("/api/v1/runs/{run_id}"))
        .with_link("logs", format!("/ws/runs/{run_id}/logs"))
        .with_link("cancel", format!("/api/v1/runs/{run_id}/cancel"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/runs - Start a run.
///
/// Synchronous runs answer `201` with the terminal snapshot; background runs
/// answer `202` with the run as it is right after scheduling.
pub async fn start_run(
    State(state): State<AppState>,
    body: Result<Json<StartRunRequest>, JsonRejection>,
) -> Result<ApiResponse<RunSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let Json(request) = body?;

    let mode = if request.background {
        RunMode::Background
    } else {
        RunMode::Sync
    };
    let snapshot = state
        .run_service
        .start_run(&request.graph_id, request.initial_context, mode)
        .await?;

    let status = match mode {
        RunMode::Sync => StatusCode::CREATED,
        RunMode::Background => StatusCode::ACCEPTED,
    };
    let run_id = snapshot.id;
    Ok(run_links(timer.ok(snapshot).with_status(status), run_id))
}

/// GET /api/v1/runs - List runs, optionally for one graph.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<ApiResponse<Vec<RunSummary>>, AppError> {
    let timer = RequestTimer::start();
    let runs = state
        .run_service
        .list_runs(query.graph_id.as_deref())
        .await?;
    let summaries = runs.into_iter().map(RunSummary::from).collect();
    Ok(timer.ok(summaries).with_link("self", "/api/v1/runs"))
}

/// GET /api/v1/runs/{id} - Status, context, logs and failure of a run.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ApiResponse<RunSnapshot>, AppError> {
    let timer = RequestTimer::start();
    let snapshot = state.run_service.get_run(run_id).await?;
    Ok(run_links(timer.ok(snapshot), run_id))
}

/// POST /api/v1/runs/{id}/cancel - Request cancellation.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<ApiResponse<CancelResponse>, AppError> {
    let timer = RequestTimer::start();
    let status = state.run_service.cancel_run(run_id).await?;
    Ok(timer
        .ok(CancelResponse {
            run_id,
            status,
            cancel_requested: true,
        })
        .with_status(StatusCode::ACCEPTED)
        .with_link("self", format!("/api/v1/runs/{run_id}")))
}
