//! Shared domain types for stepflow.
//!
//! This crate contains the types exchanged between the engine, the stores and
//! the transport layer: graph definitions, runs, log events, configuration and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod run;
