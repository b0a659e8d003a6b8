//! Observability setup for stepflow: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
