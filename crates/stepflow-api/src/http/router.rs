//! Axum router configuration with middleware.
//!
//! REST routes are under `/api/v1/`; the log stream WebSocket lives at
//! `/ws/runs/{id}/logs`. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Graph registry
        .route(
            "/graphs",
            post(handlers::graph::register_graph).get(handlers::graph::list_graphs),
        )
        .route(
            "/graphs/{id}",
            get(handlers::graph::get_graph).delete(handlers::graph::delete_graph),
        )
        // Runs
        .route(
            "/runs",
            post(handlers::run::start_run).get(handlers::run::list_runs),
        )
        .route("/runs/{id}", get(handlers::run::get_run))
        .route("/runs/{id}/cancel", post(handlers::run::cancel_run))
        // Registered callables
        .route("/callables", get(handlers::callable::list_callables));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/ws/runs/{id}/logs", get(handlers::ws::run_logs_ws))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use stepflow_core::callable::{CallableError, FnStep, StepContext};
    use stepflow_infra::tools::builtin_registry;
    use stepflow_types::config::StepflowConfig;
    use stepflow_types::graph::Context;
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let mut registry = builtin_registry().unwrap();
        registry
            .register_step(
                "test.block",
                FnStep::new(|step: StepContext| async move {
                    step.cancel.cancelled().await;
                    Err::<Context, _>(CallableError::Cancelled)
                }),
            )
            .unwrap();
        build_router(AppState::with_registry(StepflowConfig::default(), registry))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn code_review() -> Value {
        serde_json::from_str(include_str!("../../../../graphs/code_review.json")).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("ok"));
    }

    #[tokio::test]
    async fn test_register_graph_lifecycle() {
        let app = app();

        let (status, body) = send(&app, Method::POST, "/api/v1/graphs", Some(code_review())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["id"], json!("code_review"));
        assert_eq!(body["data"]["diagnostics"], json!([]));

        let (status, body) = send(&app, Method::POST, "/api/v1/graphs", Some(code_review())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], json!("GRAPH_CONFLICT"));

        let (status, body) = send(&app, Method::GET, "/api/v1/graphs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["nodes"], json!(4));

        let (status, _) = send(&app, Method::DELETE, "/api/v1/graphs/code_review", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::GET, "/api/v1/graphs/code_review", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_graph_is_unprocessable() {
        let mut graph = code_review();
        graph["start_node"] = json!("nowhere");
        let (status, body) = send(&app(), Method::POST, "/api/v1/graphs", Some(graph)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["errors"][0]["code"], json!("INVALID_GRAPH"));

        let (status, body) = send(&app(), Method::POST, "/api/v1/graphs", Some(json!({"id": 1}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], json!("BAD_REQUEST"));
    }

    #[tokio::test]
    async fn test_sync_run_returns_terminal_snapshot() {
        let app = app();
        send(&app, Method::POST, "/api/v1/graphs", Some(code_review())).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/runs",
            Some(json!({"graph_id": "code_review", "initial_context": {"issues_open": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], json!("completed"));
        assert_eq!(body["data"]["context"], json!({"issues_open": 0}));
        assert_eq!(body["data"]["logs"][0]["kind"], json!("run_started"));

        let run_id = body["data"]["id"].as_str().unwrap().to_string();
        let (status, body) = send(&app, Method::GET, &format!("/api/v1/runs/{run_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], json!("completed"));

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/runs/{run_id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["errors"][0]["code"], json!("RUN_TERMINAL"));

        let (_, body) = send(&app, Method::GET, "/api/v1/runs?graph_id=code_review", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        assert!(body["data"][0].get("logs").is_none());
    }

    #[tokio::test]
    async fn test_background_run_cancel() {
        let app = app();
        let graph = json!({
            "id": "blocking", "name": "blocking", "start_node": "wait",
            "nodes": [{"id": "wait", "callable": "test.block"}]
        });
        send(&app, Method::POST, "/api/v1/graphs", Some(graph)).await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/runs",
            Some(json!({"graph_id": "blocking", "background": true})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["data"]["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/api/v1/runs/{run_id}/cancel"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["data"]["cancel_requested"], json!(true));

        let mut final_status = Value::Null;
        for _ in 0..200 {
            let (_, body) = send(&app, Method::GET, &format!("/api/v1/runs/{run_id}"), None).await;
            final_status = body["data"]["status"].clone();
            if final_status == json!("cancelled") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(final_status, json!("cancelled"));
    }

    #[tokio::test]
    async fn test_unknown_graph_and_run() {
        let app = app();
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/v1/runs",
            Some(json!({"graph_id": "missing"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], json!("GRAPH_NOT_FOUND"));

        let uri = format!("/api/v1/runs/{}", uuid::Uuid::now_v7());
        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], json!("RUN_NOT_FOUND"));
    }

    #[tokio::test]
    async fn test_list_callables() {
        let (status, body) = send(&app(), Method::GET, "/api/v1/callables", None).await;
        assert_eq!(status, StatusCode::OK);
        let steps = body["data"]["steps"].as_array().unwrap();
        assert!(steps.contains(&json!("tools.noop")));
        assert!(steps.contains(&json!("review.fix")));
    }
}
