//! HTTP request handlers, one module per resource.

pub mod callable;
pub mod graph;
pub mod run;
pub mod ws;
