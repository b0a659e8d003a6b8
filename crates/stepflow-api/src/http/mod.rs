//! HTTP/REST API layer for stepflow.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format, a
//! WebSocket log stream per run, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
