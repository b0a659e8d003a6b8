//! Run store trait definition.

use std::sync::Arc;

use stepflow_types::error::RepositoryError;
use uuid::Uuid;

use crate::engine::RunHandle;

/// Repository trait for runs.
///
/// Runs are stored as live handles: the engine mutates their state in
/// place, so a store only needs to insert and look them up.
pub trait RunRepository: Send + Sync {
    /// Store a new run. Fails with `Conflict` if the id is taken.
    fn insert(
        &self,
        run: Arc<RunHandle>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by id.
    fn get(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Arc<RunHandle>>, RepositoryError>> + Send;

    /// List runs oldest first, optionally restricted to one graph.
    fn list(
        &self,
        graph_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Arc<RunHandle>>, RepositoryError>> + Send;
}
