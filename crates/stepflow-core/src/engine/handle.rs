//! Shared handle to one run's mutable state.
//!
//! A `RunHandle` is created `pending`, driven by exactly one engine task, and
//! read concurrently by status queries, log subscribers and cancellation
//! requests. State sits behind a per-run `tokio::sync::RwLock`; the log has
//! its own lock inside [`RunLog`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use stepflow_types::graph::Context;
use stepflow_types::run::{RunFailure, RunSnapshot, RunStatus};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::EngineError;
use crate::event::{NewEvent, RunLog};
use crate::graph::ValidatedGraph;

#[derive(Debug)]
struct RunState {
    status: RunStatus,
    context: Context,
    current_node: Option<String>,
    steps: u64,
    loop_counters: BTreeMap<usize, u32>,
    failure: Option<RunFailure>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// A run of a validated graph.
#[derive(Debug)]
pub struct RunHandle {
    id: Uuid,
    graph: Arc<ValidatedGraph>,
    state: RwLock<RunState>,
    cancel: CancellationToken,
    log: Arc<RunLog>,
    created_at: DateTime<Utc>,
}

impl RunHandle {
    /// Create a pending run. The run id is the id of `log`.
    pub fn new(graph: Arc<ValidatedGraph>, initial_context: Context, log: Arc<RunLog>) -> Self {
        Self {
            id: log.run_id(),
            graph,
            state: RwLock::new(RunState {
                status: RunStatus::Pending,
                context: initial_context,
                current_node: None,
                steps: 0,
                loop_counters: BTreeMap::new(),
                failure: None,
                started_at: None,
                finished_at: None,
            }),
            cancel: CancellationToken::new(),
            log,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn graph(&self) -> &Arc<ValidatedGraph> {
        &self.graph
    }

    pub fn log(&self) -> &Arc<RunLog> {
        &self.log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn status(&self) -> RunStatus {
        self.state.read().await.status
    }

    pub async fn context(&self) -> Context {
        self.state.read().await.context.clone()
    }

    pub async fn loop_counter(&self, edge_index: usize) -> u32 {
        self.state
            .read()
            .await
            .loop_counters
            .get(&edge_index)
            .copied()
            .unwrap_or(0)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Point-in-time view including the full log so far.
    pub async fn snapshot(&self) -> RunSnapshot {
        let logs = self.log.events().await;
        let state = self.state.read().await;
        RunSnapshot {
            id: self.id,
            graph_id: self.graph.id().to_string(),
            status: state.status,
            context: state.context.clone(),
            current_node: state.current_node.clone(),
            steps: state.steps,
            loop_counters: state.loop_counters.clone(),
            cancel_requested: self.cancel.is_cancelled(),
            failure: state.failure.clone(),
            logs,
            created_at: self.created_at,
            started_at: state.started_at,
            finished_at: state.finished_at,
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Ask the run to stop at its next safe point. Returns the status at the
    /// time of the request; terminal runs are unaffected.
    pub async fn request_cancel(&self) -> RunStatus {
        let status = self.status().await;
        if !status.is_terminal() {
            self.cancel.cancel();
            tracing::info!(run_id = %self.id, %status, "cancellation requested");
        }
        status
    }

    // -----------------------------------------------------------------------
    // Engine-only transitions
    // -----------------------------------------------------------------------

    /// `pending -> running`. A second driver gets `AlreadyStarted`.
    ///
    /// `started` is published while the state lock is held, so the event is
    /// in the log before anyone can observe `running`.
    pub(crate) async fn begin(&self, started: NewEvent) -> Result<(), EngineError> {
        let mut state = self.state.write().await;
        if state.status != RunStatus::Pending {
            return Err(EngineError::AlreadyStarted {
                run_id: self.id,
                status: state.status,
            });
        }
        self.log.publish(started).await;
        state.status = RunStatus::Running;
        state.started_at = Some(Utc::now());
        Ok(())
    }

    /// Enter `node`, returning the step count including this step.
    pub(crate) async fn enter_node(&self, node: &str) -> u64 {
        let mut state = self.state.write().await;
        state.current_node = Some(node.to_string());
        state.steps += 1;
        state.steps
    }

    pub(crate) async fn steps(&self) -> u64 {
        self.state.read().await.steps
    }

    pub(crate) async fn commit_context(&self, context: Context) {
        self.state.write().await.context = context;
    }

    /// Increment and return the counter of a loop edge.
    pub(crate) async fn increment_loop(&self, edge_index: usize) -> u32 {
        let mut state = self.state.write().await;
        let counter = state.loop_counters.entry(edge_index).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Move to a terminal status. Terminal states are absorbing: returns
    /// `false` if the run already finished.
    pub(crate) async fn finish(&self, status: RunStatus, failure: Option<RunFailure>) -> bool {
        let mut state = self.state.write().await;
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.failure = failure;
        state.finished_at = Some(Utc::now());
        true
    }
}
