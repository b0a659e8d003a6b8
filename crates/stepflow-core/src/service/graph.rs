//! Graph registration service.
//!
//! Registration validates the definition structurally and checks every
//! callable it names against the registry, so a graph that is accepted
//! can always be resolved when a run starts.

use std::sync::Arc;

use stepflow_types::error::RepositoryError;
use stepflow_types::graph::GraphDefinition;
use thiserror::Error;

use crate::callable::CallableRegistry;
use crate::graph::{ValidatedGraph, ValidationError, validate_with_callables};
use crate::repository::GraphRepository;

#[derive(Debug, Error)]
pub enum GraphServiceError {
    #[error("invalid graph: {0}")]
    Invalid(#[from] ValidationError),

    #[error("graph '{0}' already exists")]
    Duplicate(String),

    #[error("graph '{0}' not found")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for GraphServiceError {
    fn from(err: RepositoryError) -> Self {
        GraphServiceError::Storage(err.to_string())
    }
}

/// Service managing the graph registry.
pub struct GraphService<G: GraphRepository> {
    repo: G,
    registry: Arc<CallableRegistry>,
}

impl<G: GraphRepository> GraphService<G> {
    pub fn new(repo: G, registry: Arc<CallableRegistry>) -> Self {
        Self { repo, registry }
    }

    /// Validate and store a graph definition.
    pub async fn register(
        &self,
        definition: &GraphDefinition,
    ) -> Result<Arc<ValidatedGraph>, GraphServiceError> {
        let graph = Arc::new(validate_with_callables(definition, &self.registry)?);

        self.repo
            .insert(Arc::clone(&graph))
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => GraphServiceError::Duplicate(graph.id().to_string()),
                other => other.into(),
            })?;

        tracing::info!(
            graph_id = graph.id(),
            nodes = graph.nodes().len(),
            edges = graph.edges().len(),
            diagnostics = graph.diagnostics().len(),
            "graph registered"
        );
        Ok(graph)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<ValidatedGraph>, GraphServiceError> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| GraphServiceError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Result<Vec<Arc<ValidatedGraph>>, GraphServiceError> {
        Ok(self.repo.list().await?)
    }

    /// Remove a graph. Runs already started are unaffected.
    pub async fn delete(&self, id: &str) -> Result<(), GraphServiceError> {
        if !self.repo.delete(id).await? {
            return Err(GraphServiceError::NotFound(id.to_string()));
        }
        tracing::info!(graph_id = id, "graph deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::SyncFnStep;
    use crate::service::testing::MemGraphs;
    use serde_json::json;

    fn service() -> GraphService<MemGraphs> {
        let mut registry = CallableRegistry::new();
        registry
            .register_step("tools.noop", SyncFnStep::new(Ok))
            .unwrap();
        GraphService::new(MemGraphs::default(), Arc::new(registry))
    }

    fn definition(id: &str, callable: &str) -> GraphDefinition {
        serde_json::from_value(json!({
            "id": id, "name": id, "start_node": "a",
            "nodes": [{"id": "a", "callable": callable}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let service = service();
        let graph = service.register(&definition("g1", "tools.noop")).await.unwrap();
        assert_eq!(graph.id(), "g1");

        let fetched = service.get("g1").await.unwrap();
        assert!(Arc::ptr_eq(&graph, &fetched));
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let service = service();
        service.register(&definition("g1", "tools.noop")).await.unwrap();
        let err = service
            .register(&definition("g1", "tools.noop"))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphServiceError::Duplicate(id) if id == "g1"));
    }

    #[tokio::test]
    async fn test_unknown_callable_rejected_at_registration() {
        let err = service()
            .register(&definition("g1", "missing.step"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GraphServiceError::Invalid(ValidationError::UnknownCallable { name }) if name == "missing.step"
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let service = service();
        service.register(&definition("g1", "tools.noop")).await.unwrap();
        service.delete("g1").await.unwrap();
        assert!(matches!(
            service.get("g1").await,
            Err(GraphServiceError::NotFound(_))
        ));
        assert!(matches!(
            service.delete("g1").await,
            Err(GraphServiceError::NotFound(_))
        ));
    }
}
