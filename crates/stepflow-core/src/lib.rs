//! Graph validation, expression evaluation and execution for stepflow.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements. It depends only on `stepflow-types` -- never on
//! `stepflow-infra` or any IO crate beyond reading graph files.

pub mod callable;
pub mod engine;
pub mod event;
pub mod expression;
pub mod graph;
pub mod repository;
pub mod service;
