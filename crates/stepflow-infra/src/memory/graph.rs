//! In-memory graph registry.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepflow_core::graph::ValidatedGraph;
use stepflow_core::repository::GraphRepository;
use stepflow_types::error::RepositoryError;

/// `DashMap`-backed implementation of `GraphRepository`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphRepository {
    graphs: Arc<DashMap<String, Arc<ValidatedGraph>>>,
}

impl InMemoryGraphRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphRepository for InMemoryGraphRepository {
    async fn insert(&self, graph: Arc<ValidatedGraph>) -> Result<(), RepositoryError> {
        match self.graphs.entry(graph.id().to_string()) {
            Entry::Occupied(entry) => Err(RepositoryError::Conflict(format!(
                "graph '{}' already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(graph);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Arc<ValidatedGraph>>, RepositoryError> {
        Ok(self.graphs.get(id).map(|entry| Arc::clone(entry.value())))
    }

    async fn list(&self) -> Result<Vec<Arc<ValidatedGraph>>, RepositoryError> {
        let mut graphs: Vec<Arc<ValidatedGraph>> = self
            .graphs
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        graphs.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(graphs)
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        Ok(self.graphs.remove(id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepflow_core::graph::validate;
    use stepflow_types::graph::GraphDefinition;

    fn graph(id: &str) -> Arc<ValidatedGraph> {
        let def: GraphDefinition = serde_json::from_value(json!({
            "id": id, "name": id, "start_node": "a",
            "nodes": [{"id": "a", "callable": "tools.noop"}]
        }))
        .unwrap();
        Arc::new(validate(&def).unwrap())
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let repo = InMemoryGraphRepository::new();
        repo.insert(graph("g")).await.unwrap();
        let err = repo.insert(graph("g")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_sorted_and_delete() {
        let repo = InMemoryGraphRepository::new();
        repo.insert(graph("b")).await.unwrap();
        repo.insert(graph("a")).await.unwrap();

        let ids: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .iter()
            .map(|g| g.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(repo.delete("a").await.unwrap());
        assert!(!repo.delete("a").await.unwrap());
        assert!(repo.get("a").await.unwrap().is_none());
        assert!(repo.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let repo = InMemoryGraphRepository::new();
        let other = repo.clone();
        repo.insert(graph("g")).await.unwrap();
        assert!(other.get("g").await.unwrap().is_some());
    }
}
