//! In-memory repository implementations.
//!
//! Both stores are `DashMap`-backed and cheap to clone: clones share the
//! same map, so the HTTP state and the services can hold their own handles.

pub mod graph;
pub mod run;

pub use graph::InMemoryGraphRepository;
pub use run::InMemoryRunRepository;
