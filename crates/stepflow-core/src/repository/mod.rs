//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (stepflow-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod graph;
pub mod run;

pub use graph::GraphRepository;
pub use run::RunRepository;
