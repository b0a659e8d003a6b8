//! Graph registry trait definition.
//!
//! Stores validated graphs by their client-chosen id. Graphs are immutable
//! once registered; re-registering an id is a conflict, not an update.

use std::sync::Arc;

use stepflow_types::error::RepositoryError;

use crate::graph::ValidatedGraph;

/// Repository trait for registered graphs.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait GraphRepository: Send + Sync {
    /// Register a graph. Fails with `Conflict` if the id is taken.
    fn insert(
        &self,
        graph: Arc<ValidatedGraph>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a graph by id.
    fn get(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Arc<ValidatedGraph>>, RepositoryError>> + Send;

    /// List every registered graph, ordered by id.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Arc<ValidatedGraph>>, RepositoryError>> + Send;

    /// Remove a graph. Returns `true` if it existed. Runs already started
    /// keep their own reference to the graph.
    fn delete(
        &self,
        id: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
