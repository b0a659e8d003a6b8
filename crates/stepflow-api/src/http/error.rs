//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use stepflow_core::graph::ValidationError;
use stepflow_core::service::{GraphServiceError, RunServiceError};

use crate::http::response::RequestTimer;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Graph registry errors.
    Graph(GraphServiceError),
    /// Run lifecycle errors.
    Run(RunServiceError),
    /// Malformed request body or parameters.
    BadRequest(String),
    /// Generic internal error.
    Internal(String),
}

impl From<GraphServiceError> for AppError {
    fn from(e: GraphServiceError) -> Self {
        AppError::Graph(e)
    }
}

impl From<RunServiceError> for AppError {
    fn from(e: RunServiceError) -> Self {
        AppError::Run(e)
    }
}

impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(e: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl AppError {
    /// Status, machine-readable code and optional structured details.
    fn parts(&self) -> (StatusCode, &'static str, Option<serde_json::Value>) {
        match self {
            AppError::Graph(GraphServiceError::Invalid(err)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_GRAPH",
                validation_details(err),
            ),
            AppError::Graph(GraphServiceError::Duplicate(_)) => {
                (StatusCode::CONFLICT, "GRAPH_CONFLICT", None)
            }
            AppError::Graph(GraphServiceError::NotFound(_))
            | AppError::Run(RunServiceError::GraphNotFound(_)) => {
                (StatusCode::NOT_FOUND, "GRAPH_NOT_FOUND", None)
            }
            AppError::Run(RunServiceError::RunNotFound(_)) => {
                (StatusCode::NOT_FOUND, "RUN_NOT_FOUND", None)
            }
            AppError::Run(RunServiceError::AlreadyTerminal { status, .. }) => (
                StatusCode::CONFLICT,
                "RUN_TERMINAL",
                Some(json!({ "status": status })),
            ),
            AppError::Graph(GraphServiceError::Storage(_)) | AppError::Run(RunServiceError::Storage(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR", None)
            }
            AppError::Run(RunServiceError::Engine(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR", None)
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", None),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", None),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Graph(e) => e.to_string(),
            AppError::Run(e) => e.to_string(),
            AppError::BadRequest(msg) | AppError::Internal(msg) => msg.clone(),
        }
    }
}

fn validation_details(err: &ValidationError) -> Option<serde_json::Value> {
    match err {
        ValidationError::UnknownEdgeNode { edge_index, node } => {
            Some(json!({ "edge_index": edge_index, "node": node }))
        }
        ValidationError::InvalidLoopLimit { edge_index, .. }
        | ValidationError::MissingCondition { edge_index }
        | ValidationError::InvalidExpression { edge_index, .. } => {
            Some(json!({ "edge_index": edge_index }))
        }
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, details) = self.parts();
        let message = self.message();

        if status.is_server_error() {
            tracing::error!(code, error = %message, "request failed");
        } else {
            tracing::debug!(code, error = %message, "request rejected");
        }

        RequestTimer::start()
            .error(status, code, message, details)
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::run::RunStatus;
    use uuid::Uuid;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(GraphServiceError::Duplicate("g".into()).into()),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(GraphServiceError::Invalid(ValidationError::EmptyGraph).into()),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(GraphServiceError::NotFound("g".into()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(RunServiceError::RunNotFound(Uuid::now_v7()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                RunServiceError::AlreadyTerminal {
                    run_id: Uuid::now_v7(),
                    status: RunStatus::Completed,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(AppError::BadRequest("nope".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_validation_details_carry_edge_index() {
        let err = ValidationError::MissingCondition { edge_index: 4 };
        assert_eq!(validation_details(&err), Some(json!({ "edge_index": 4 })));
        assert_eq!(validation_details(&ValidationError::EmptyGraph), None);
    }
}
