//! Run lifecycle service.
//!
//! `RunService` ties together the graph registry, the run store, the engine
//! and the log stream. A run is created `pending`, stored, and then executed
//! on its own task. `RunMode::Sync` waits for the terminal snapshot;
//! `RunMode::Background` returns right away.

use std::sync::Arc;

use futures_util::Stream;
use stepflow_types::error::RepositoryError;
use stepflow_types::event::StreamMessage;
use stepflow_types::graph::Context;
use stepflow_types::run::{RunMode, RunSnapshot, RunStatus};
use thiserror::Error;
use uuid::Uuid;

use crate::engine::{Engine, EngineError, RunHandle};
use crate::event::LogStream;
use crate::repository::{GraphRepository, RunRepository};

#[derive(Debug, Error)]
pub enum RunServiceError {
    #[error("graph '{0}' not found")]
    GraphNotFound(String),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {run_id} already finished with status {status}")]
    AlreadyTerminal { run_id: Uuid, status: RunStatus },

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for RunServiceError {
    fn from(err: RepositoryError) -> Self {
        RunServiceError::Storage(err.to_string())
    }
}

/// Service orchestrating run creation, execution, queries and cancellation.
pub struct RunService<G: GraphRepository, R: RunRepository> {
    graphs: G,
    runs: R,
    engine: Engine,
    logs: LogStream,
}

impl<G: GraphRepository, R: RunRepository> RunService<G, R> {
    pub fn new(graphs: G, runs: R, engine: Engine, logs: LogStream) -> Self {
        Self {
            graphs,
            runs,
            engine,
            logs,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Create a run of `graph_id` and execute it.
    ///
    /// Both modes execute on a task of their own; they differ only in
    /// whether this call waits. In `Sync` mode the returned snapshot is
    /// terminal. In `Background`
    /// mode it is taken right after the run is handed to its task, so its
    /// status is `pending` or `running` (or already terminal for very short
    /// graphs).
    pub async fn start_run(
        &self,
        graph_id: &str,
        initial_context: Context,
        mode: RunMode,
    ) -> Result<RunSnapshot, RunServiceError> {
        let graph = self
            .graphs
            .get(graph_id)
            .await?
            .ok_or_else(|| RunServiceError::GraphNotFound(graph_id.to_string()))?;

        let log = self.logs.open(Uuid::now_v7());
        let run = Arc::new(RunHandle::new(graph, initial_context, log));
        self.runs.insert(Arc::clone(&run)).await?;

        tracing::info!(run_id = %run.id(), graph_id, ?mode, "run created");

        match mode {
            // Driven on its own task so a caller that stops waiting (a
            // dropped HTTP request) cannot strand the run in `running`.
            RunMode::Sync => {
                let run_id = run.id();
                let snapshot = self.engine.spawn(run).await.map_err(|err| {
                    EngineError::TaskFailed {
                        run_id,
                        message: err.to_string(),
                    }
                })??;
                Ok(snapshot)
            }
            RunMode::Background => {
                let task = self.engine.spawn(Arc::clone(&run));
                let run_id = run.id();
                tokio::spawn(async move {
                    match task.await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => tracing::error!(%run_id, error = %err, "background run failed to start"),
                        Err(err) => tracing::error!(%run_id, error = %err, "background run task panicked"),
                    }
                });
                Ok(run.snapshot().await)
            }
        }
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunSnapshot, RunServiceError> {
        Ok(self.handle(run_id).await?.snapshot().await)
    }

    /// Snapshots of all runs, oldest first, optionally for one graph.
    pub async fn list_runs(
        &self,
        graph_id: Option<&str>,
    ) -> Result<Vec<RunSnapshot>, RunServiceError> {
        let runs = self.runs.list(graph_id).await?;
        let mut snapshots = Vec::with_capacity(runs.len());
        for run in runs {
            snapshots.push(run.snapshot().await);
        }
        Ok(snapshots)
    }

    /// Request cancellation. Returns the status at the time of the request;
    /// the run stops at its next safe point.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<RunStatus, RunServiceError> {
        let run = self.handle(run_id).await?;
        let status = run.request_cancel().await;
        if status.is_terminal() {
            return Err(RunServiceError::AlreadyTerminal { run_id, status });
        }
        Ok(status)
    }

    /// Full history of the run followed by live events, ending with its
    /// terminal status.
    pub async fn subscribe(
        &self,
        run_id: Uuid,
    ) -> Result<impl Stream<Item = StreamMessage> + Send + 'static, RunServiceError> {
        self.logs
            .subscribe(run_id)
            .map_err(|_| RunServiceError::RunNotFound(run_id))
    }

    async fn handle(&self, run_id: Uuid) -> Result<Arc<RunHandle>, RunServiceError> {
        self.runs
            .get(&run_id)
            .await?
            .ok_or(RunServiceError::RunNotFound(run_id))
    }
}
