//! In-memory run store.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use stepflow_core::engine::RunHandle;
use stepflow_core::repository::RunRepository;
use stepflow_types::error::RepositoryError;
use uuid::Uuid;

/// `DashMap`-backed implementation of `RunRepository`.
///
/// Run ids are UUID v7, so sorting by id lists runs in creation order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRunRepository {
    runs: Arc<DashMap<Uuid, Arc<RunHandle>>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRunRepository {
    async fn insert(&self, run: Arc<RunHandle>) -> Result<(), RepositoryError> {
        match self.runs.entry(run.id()) {
            Entry::Occupied(entry) => Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(run);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &Uuid) -> Result<Option<Arc<RunHandle>>, RepositoryError> {
        Ok(self.runs.get(id).map(|entry| Arc::clone(entry.value())))
    }

    async fn list(&self, graph_id: Option<&str>) -> Result<Vec<Arc<RunHandle>>, RepositoryError> {
        let mut runs: Vec<Arc<RunHandle>> = self
            .runs
            .iter()
            .filter(|entry| graph_id.is_none_or(|id| entry.value().graph().id() == id))
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        runs.sort_by_key(|run| run.id());
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepflow_core::event::RunLog;
    use stepflow_core::graph::validate;
    use stepflow_types::graph::{Context, GraphDefinition};

    fn run(graph_id: &str) -> Arc<RunHandle> {
        let def: GraphDefinition = serde_json::from_value(json!({
            "id": graph_id, "name": graph_id, "start_node": "a",
            "nodes": [{"id": "a", "callable": "tools.noop"}]
        }))
        .unwrap();
        let graph = Arc::new(validate(&def).unwrap());
        let log = Arc::new(RunLog::new(Uuid::now_v7(), 8));
        Arc::new(RunHandle::new(graph, Context::new(), log))
    }

    #[tokio::test]
    async fn test_insert_get_and_conflict() {
        let repo = InMemoryRunRepository::new();
        let r = run("g");
        repo.insert(Arc::clone(&r)).await.unwrap();
        assert!(matches!(
            repo.insert(Arc::clone(&r)).await,
            Err(RepositoryError::Conflict(_))
        ));
        let fetched = repo.get(&r.id()).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&r, &fetched));
        assert!(repo.get(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_in_creation_order_with_filter() {
        let repo = InMemoryRunRepository::new();
        let first = run("a");
        let second = run("b");
        let third = run("a");
        for r in [&third, &first, &second] {
            repo.insert(Arc::clone(r)).await.unwrap();
        }

        let all: Vec<Uuid> = repo.list(None).await.unwrap().iter().map(|r| r.id()).collect();
        assert_eq!(all, vec![first.id(), second.id(), third.id()]);

        let only_a: Vec<Uuid> = repo
            .list(Some("a"))
            .await
            .unwrap()
            .iter()
            .map(|r| r.id())
            .collect();
        assert_eq!(only_a, vec![first.id(), third.id()]);
    }
}
