//! Graph registry handlers for the REST API.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Serialize;

use stepflow_core::graph::{GraphDiagnostic, ValidatedGraph};
use stepflow_types::graph::GraphDefinition;

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// A registered graph as returned by the API: its definition plus any
/// non-fatal diagnostics found at registration.
#[derive(Debug, Serialize)]
pub struct GraphView {
    #[serde(flatten)]
    pub definition: GraphDefinition,
    pub diagnostics: Vec<GraphDiagnostic>,
}

impl From<&ValidatedGraph> for GraphView {
    fn from(graph: &ValidatedGraph) -> Self {
        Self {
            definition: graph.definition().clone(),
            diagnostics: graph.diagnostics().to_vec(),
        }
    }
}

/// Compact listing entry.
#[derive(Debug, Serialize)]
pub struct GraphSummary {
    pub id: String,
    pub name: String,
    pub start_node: String,
    pub nodes: usize,
    pub edges: usize,
    pub diagnostics: usize,
}

impl From<&ValidatedGraph> for GraphSummary {
    fn from(graph: &ValidatedGraph) -> Self {
        Self {
            id: graph.id().to_string(),
            name: graph.name().to_string(),
            start_node: graph.start_node().to_string(),
            nodes: graph.nodes().len(),
            edges: graph.edges().len(),
            diagnostics: graph.diagnostics().len(),
        }
    }
}

/// POST /api/v1/graphs - Register a graph definition.
pub async fn register_graph(
    State(state): State<AppState>,
    body: Result<Json<GraphDefinition>, JsonRejection>,
) -> Result<ApiResponse<GraphView>, AppError> {
    let timer = RequestTimer::start();
    let Json(definition) = body?;

    let graph = state.graph_service.register(&definition).await?;

    Ok(timer
        .ok(GraphView::from(graph.as_ref()))
        .with_status(StatusCode::CREATED)
        .with_link("self", format!("/api/v1/graphs/{}", graph.id())))
}

/// GET /api/v1/graphs - List registered graphs.
pub async fn list_graphs(
    State(state): State<AppState>,
) -> Result<ApiResponse<Vec<GraphSummary>>, AppError> {
    let timer = RequestTimer::start();
    let graphs = state.graph_service.list().await?;
    let summaries = graphs.iter().map(|g| GraphSummary::from(g.as_ref())).collect();
    Ok(timer.ok(summaries).with_link("self", "/api/v1/graphs"))
}

/// GET /api/v1/graphs/{id} - Get a graph with its diagnostics.
pub async fn get_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<GraphView>, AppError> {
    let timer = RequestTimer::start();
    let graph = state.graph_service.get(&id).await?;
    Ok(timer
        .ok(GraphView::from(graph.as_ref()))
        .with_link("self", format!("/api/v1/graphs/{id}"))
        .with_link("runs", format!("/api/v1/runs?graph_id={id}")))
}

/// DELETE /api/v1/graphs/{id} - Remove a graph. Runs already started keep going.
pub async fn delete_graph(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, AppError> {
    let timer = RequestTimer::start();
    state.graph_service.delete(&id).await?;
    Ok(timer.ok(serde_json::json!({ "id": id, "deleted": true })))
}
