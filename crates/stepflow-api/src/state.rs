//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both the CLI and
//! the REST API. Services are generic over repository traits, but AppState
//! pins them to the in-memory infra implementations.

use std::sync::Arc;

use stepflow_core::callable::CallableRegistry;
use stepflow_core::engine::Engine;
use stepflow_core::event::LogStream;
use stepflow_core::service::{GraphService, RunService};
use stepflow_infra::memory::{InMemoryGraphRepository, InMemoryRunRepository};
use stepflow_infra::tools::builtin_registry;
use stepflow_types::config::StepflowConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteGraphService = GraphService<InMemoryGraphRepository>;

pub type ConcreteRunService = RunService<InMemoryGraphRepository, InMemoryRunRepository>;

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub graph_service: Arc<ConcreteGraphService>,
    pub run_service: Arc<ConcreteRunService>,
    pub registry: Arc<CallableRegistry>,
    pub config: Arc<StepflowConfig>,
}

impl AppState {
    /// Initialize the application state with the built-in callables.
    pub fn init(config: StepflowConfig) -> anyhow::Result<Self> {
        let registry = builtin_registry()?;
        Ok(Self::with_registry(config, registry))
    }

    /// Wire services around an already populated callable registry.
    pub fn with_registry(config: StepflowConfig, registry: CallableRegistry) -> Self {
        let registry = Arc::new(registry);

        // Both services share the same graph map.
        let graph_repo = InMemoryGraphRepository::new();
        let run_repo = InMemoryRunRepository::new();

        let engine = Engine::new(Arc::clone(&registry), config.engine.clone());
        let logs = LogStream::new(config.engine.stream_capacity);

        let graph_service = GraphService::new(graph_repo.clone(), Arc::clone(&registry));
        let run_service = RunService::new(graph_repo, run_repo, engine, logs);

        tracing::debug!(
            steps = registry.step_names().len(),
            predicates = registry.predicate_names().len(),
            "application state initialized"
        );

        Self {
            graph_service: Arc::new(graph_service),
            run_service: Arc::new(run_service),
            registry,
            config: Arc::new(config),
        }
    }
}
