//! Callable registry handler.

use axum::extract::State;
use serde::Serialize;

use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CallableList {
    pub steps: Vec<String>,
    pub predicates: Vec<String>,
}

/// GET /api/v1/callables - Names graphs may reference.
pub async fn list_callables(State(state): State<AppState>) -> ApiResponse<CallableList> {
    let timer = RequestTimer::start();
    timer.ok(CallableList {
        steps: state.registry.step_names().into_iter().map(String::from).collect(),
        predicates: state
            .registry
            .predicate_names()
            .into_iter()
            .map(String::from)
            .collect(),
    })
}
