//! Run log streaming.
//!
//! Provides a `LogStream` that records each run's `LogEvent` history and
//! fans new events out to subscribers via `tokio::sync::broadcast`.

pub mod stream;

pub use stream::{LogStream, NewEvent, RunLog, StreamError};
