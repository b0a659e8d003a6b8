//! Envelope response format for all API responses.
//!
//! Every response is wrapped in a consistent envelope:
//! ```json
//! {
//!   "data": { ... },
//!   "meta": { "request_id": "...", "timestamp": "...", "response_time_ms": 5 },
//!   "errors": [],
//!   "_links": { "self": "..." }
//! }
//! ```

use std::collections::BTreeMap;
use std::time::Instant;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use uuid::Uuid;

/// Envelope response wrapping all API data.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// The main response payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    /// Request metadata.
    pub meta: ApiMeta,

    /// Error list (empty on success).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ApiErrorDetail>,

    /// HATEOAS-style links for discoverability.
    #[serde(rename = "_links", skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,

    #[serde(skip)]
    status: StatusCode,
}

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ApiMeta {
    /// Unique request identifier for tracing.
    pub request_id: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
    /// Response time in milliseconds.
    pub response_time_ms: u64,
}

/// Individual error detail.
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Per-request id and start time, captured at the top of each handler.
#[derive(Debug, Clone)]
pub struct RequestTimer {
    request_id: String,
    started: Instant,
}

impl RequestTimer {
    pub fn start() -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            started: Instant::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    fn meta(&self) -> ApiMeta {
        ApiMeta {
            request_id: self.request_id.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            response_time_ms: self.started.elapsed().as_millis() as u64,
        }
    }

    /// Wrap `data` in a `200 OK` envelope.
    pub fn ok<T: Serialize>(&self, data: T) -> ApiResponse<T> {
        ApiResponse {
            data: Some(data),
            meta: self.meta(),
            errors: Vec::new(),
            links: BTreeMap::new(),
            status: StatusCode::OK,
        }
    }

    /// Build an error envelope.
    pub fn error(
        &self,
        status: StatusCode,
        code: &str,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> ApiResponse<()> {
        ApiResponse {
            data: None,
            meta: self.meta(),
            errors: vec![ApiErrorDetail {
                code: code.to_string(),
                message: message.into(),
                details,
            }],
            links: BTreeMap::new(),
            status,
        }
    }
}

impl<T: Serialize> ApiResponse<T> {
    /// Override the HTTP status (e.g. `201 Created`, `202 Accepted`).
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Add a HATEOAS link.
    pub fn with_link(mut self, rel: &str, href: impl Into<String>) -> Self {
        self.links.insert(rel.to_string(), href.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = serde_json::to_string(&self).unwrap_or_else(|_| {
            r#"{"errors":[{"code":"SERIALIZATION_ERROR","message":"Failed to serialize response"}]}"#.to_string()
        });

        (
            self.status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_shape() {
        let timer = RequestTimer::start();
        let resp = timer
            .ok(json!({"id": "g"}))
            .with_status(StatusCode::CREATED)
            .with_link("self", "/api/v1/graphs/g");
        assert_eq!(resp.status(), StatusCode::CREATED);

        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["data"]["id"], json!("g"));
        assert_eq!(value["meta"]["request_id"], json!(timer.request_id()));
        assert_eq!(value["_links"]["self"], json!("/api/v1/graphs/g"));
        assert!(value.get("errors").is_none());
        assert!(value.get("status").is_none());
    }

    #[test]
    fn test_error_envelope_shape() {
        let resp = RequestTimer::start().error(StatusCode::NOT_FOUND, "RUN_NOT_FOUND", "missing", None);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("data").is_none());
        assert_eq!(value["errors"][0]["code"], json!("RUN_NOT_FOUND"));
        assert_eq!(value["errors"][0]["message"], json!("missing"));
    }
}
