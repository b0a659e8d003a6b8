//! Infrastructure layer for stepflow.
//!
//! Contains implementations of the repository traits defined in
//! `stepflow-core` (in-memory, `DashMap`-backed), the configuration loader,
//! and the built-in step callables.

pub mod config;
pub mod memory;
pub mod tools;
