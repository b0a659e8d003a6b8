//! Business logic services (use cases).
//!
//! Services orchestrate repository calls, the engine and the log stream.
//! They depend on traits (ports) -- never on concrete infrastructure
//! implementations.

pub mod graph;
pub mod run;

pub use graph::{GraphService, GraphServiceError};
pub use run::{RunService, RunServiceError};

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal in-memory repositories for service tests.

    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use stepflow_types::error::RepositoryError;
    use uuid::Uuid;

    use crate::engine::RunHandle;
    use crate::graph::ValidatedGraph;
    use crate::repository::{GraphRepository, RunRepository};

    #[derive(Clone, Default)]
    pub struct MemGraphs(Arc<Mutex<BTreeMap<String, Arc<ValidatedGraph>>>>);

    impl GraphRepository for MemGraphs {
        async fn insert(&self, graph: Arc<ValidatedGraph>) -> Result<(), RepositoryError> {
            let mut map = self.0.lock().unwrap();
            if map.contains_key(graph.id()) {
                return Err(RepositoryError::Conflict(graph.id().to_string()));
            }
            map.insert(graph.id().to_string(), graph);
            Ok(())
        }

        async fn get(&self, id: &str) -> Result<Option<Arc<ValidatedGraph>>, RepositoryError> {
            Ok(self.0.lock().unwrap().get(id).cloned())
        }

        async fn list(&self) -> Result<Vec<Arc<ValidatedGraph>>, RepositoryError> {
            Ok(self.0.lock().unwrap().values().cloned().collect())
        }

        async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
            Ok(self.0.lock().unwrap().remove(id).is_some())
        }
    }

    #[derive(Clone, Default)]
    pub struct MemRuns(Arc<Mutex<BTreeMap<Uuid, Arc<RunHandle>>>>);

    impl RunRepository for MemRuns {
        async fn insert(&self, run: Arc<RunHandle>) -> Result<(), RepositoryError> {
            self.0.lock().unwrap().insert(run.id(), run);
            Ok(())
        }

        async fn get(&self, id: &Uuid) -> Result<Option<Arc<RunHandle>>, RepositoryError> {
            Ok(self.0.lock().unwrap().get(id).cloned())
        }

        async fn list(&self, graph_id: Option<&str>) -> Result<Vec<Arc<RunHandle>>, RepositoryError> {
            Ok(self
                .0
                .lock()
                .unwrap()
                .values()
                .filter(|run| graph_id.is_none_or(|id| run.graph().id() == id))
                .cloned()
                .collect())
        }
    }
}
