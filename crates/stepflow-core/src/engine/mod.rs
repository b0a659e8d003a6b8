//! Graph execution engine.
//!
//! The `Engine` drives a [`RunHandle`] from `pending` to a terminal status:
//!
//! 1. Move the run to `running` (one driver per run).
//! 2. Resolve every callable the graph names; a missing one fails the run
//!    before any node executes.
//! 3. Starting at `start_node`, repeatedly: check cancellation, invoke the
//!    node's callable under the step timeout, then pick the outgoing edge
//!    (first true branch, else loop unless exited, else sequential).
//! 4. Stop when no edge is eligible (`completed`), on any error (`failed`),
//!    on cancellation (`cancelled`), or when the step ceiling is exceeded.
//!
//! Every decision is published to the run's log before the state change it
//! describes becomes visible. Synchronous and background runs share this
//! code; [`Engine::spawn`] only moves the await onto its own task.

pub mod handle;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use stepflow_types::config::EngineConfig;
use stepflow_types::event::EventKind;
use stepflow_types::run::{RunErrorKind, RunFailure, RunSnapshot, RunStatus};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use handle::RunHandle;

use crate::callable::{CallableError, CallableRegistry, ResolvedCallables, StepContext};
use crate::event::NewEvent;
use crate::graph::{Condition, EdgeKind, ValidatedGraph};

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors returned to the caller of the engine itself. Failures inside a
/// run are not errors here; they end the run with status `failed`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("run {run_id} was already started (status: {status})")]
    AlreadyStarted { run_id: Uuid, status: RunStatus },

    #[error("engine task for run {run_id} ended abnormally: {message}")]
    TaskFailed { run_id: Uuid, message: String },
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug)]
enum Outcome {
    Completed { node: String },
    Failed(RunFailure),
    Cancelled { node: Option<String> },
}

impl Outcome {
    fn failed(kind: RunErrorKind, message: impl Into<String>, node: Option<&str>) -> Self {
        Outcome::Failed(RunFailure {
            kind,
            message: message.into(),
            node_id: node.map(str::to_string),
            edge_index: None,
        })
    }

    fn eval_failed(message: impl Into<String>, node: &str, edge_index: usize) -> Self {
        Outcome::Failed(RunFailure {
            kind: RunErrorKind::Eval,
            message: message.into(),
            node_id: Some(node.to_string()),
            edge_index: Some(edge_index),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Executes runs. Cheap to clone; clones share the callable registry.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: Arc<CallableRegistry>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<CallableRegistry>, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<CallableRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Drive `run` to a terminal status and return its final snapshot.
    pub async fn execute(&self, run: Arc<RunHandle>) -> Result<RunSnapshot, EngineError> {
        let start = run.graph().start_node();
        run.begin(
            NewEvent::info(EventKind::RunStarted, format!("run started at node '{start}'"))
                .node(start)
                .data(json!({ "graph_id": run.graph().id(), "start_node": start })),
        )
        .await?;

        let started = Instant::now();
        tracing::info!(
            run_id = %run.id(),
            graph_id = run.graph().id(),
            "run started"
        );

        let outcome = self.drive(&run).await;
        self.conclude(&run, outcome, started.elapsed()).await;

        Ok(run.snapshot().await)
    }

    /// Drive `run` on its own task. The caller gets control back
    /// immediately and may poll, subscribe or cancel by run id.
    pub fn spawn(&self, run: Arc<RunHandle>) -> JoinHandle<Result<RunSnapshot, EngineError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.execute(run).await })
    }

    // -----------------------------------------------------------------------
    // Traversal
    // -----------------------------------------------------------------------

    async fn drive(&self, run: &RunHandle) -> Outcome {
        let graph = Arc::clone(run.graph());
        let start = graph.start_node().to_string();

        let resolved = match self.registry.resolve(&graph) {
            Ok(resolved) => resolved,
            Err(err) => {
                return Outcome::failed(RunErrorKind::UnknownCallable, err.to_string(), None);
            }
        };

        let step_timeout = self.config.step_timeout();
        let mut current = start;

        loop {
            // (a) safe point before every node
            if run.is_cancel_requested() {
                return Outcome::Cancelled {
                    node: Some(current),
                };
            }

            if run.steps().await >= self.config.max_steps {
                return Outcome::failed(
                    RunErrorKind::ExecutionCeilingExceeded,
                    format!("run exceeded {} steps", self.config.max_steps),
                    Some(&current),
                );
            }

            // (b) invoke the node
            if let Err(outcome) = self
                .run_node(run, &graph, &resolved, &current, step_timeout)
                .await
            {
                return outcome;
            }

            // (c) pick the next edge
            match self.select_edge(run, &graph, &resolved, &current).await {
                Ok(Some(edge_index)) => {
                    let Some(edge) = graph.edge(edge_index) else {
                        return Outcome::failed(
                            RunErrorKind::Validation,
                            format!("edge #{edge_index} does not exist"),
                            Some(&current),
                        );
                    };
                    self.emit(
                        run,
                        NewEvent::debug(
                            EventKind::EdgeTaken,
                            format!("{} edge '{}' -> '{}'", edge.edge_type(), edge.from, edge.to),
                        )
                        .node(current.as_str())
                        .data(json!({
                            "edge_index": edge_index,
                            "type": edge.edge_type(),
                            "to": edge.to,
                        })),
                    )
                    .await;
                    current = edge.to.clone();
                }
                Ok(None) => return Outcome::Completed { node: current },
                Err(outcome) => return outcome,
            }
        }
    }

    /// Execute one node. On success the new context is committed; on
    /// failure the context before the step is kept.
    async fn run_node(
        &self,
        run: &RunHandle,
        graph: &ValidatedGraph,
        resolved: &ResolvedCallables,
        node_id: &str,
        step_timeout: Duration,
    ) -> Result<(), Outcome> {
        let callable = graph
            .node(node_id)
            .map(|n| n.callable.clone())
            .unwrap_or_default();

        self.emit(
            run,
            NewEvent::info(EventKind::NodeStarted, format!("node '{node_id}' started"))
                .node(node_id)
                .data(json!({ "callable": callable })),
        )
        .await;
        let step_count = run.enter_node(node_id).await;

        let Some(step) = resolved.step_for(node_id) else {
            return Err(Outcome::failed(
                RunErrorKind::UnknownCallable,
                CallableError::Unknown(callable).to_string(),
                Some(node_id),
            ));
        };

        let step_ctx = StepContext {
            run_id: run.id(),
            node_id: node_id.to_string(),
            context: run.context().await,
            cancel: run.cancel_token().child_token(),
        };

        let started = Instant::now();
        let result = tokio::time::timeout(step_timeout, step.call(step_ctx)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(context)) => {
                tracing::debug!(
                    run_id = %run.id(),
                    node_id,
                    step = step_count,
                    elapsed_ms,
                    "node completed"
                );
                self.emit(
                    run,
                    NewEvent::info(EventKind::NodeCompleted, format!("node '{node_id}' completed"))
                        .node(node_id),
                )
                .await;
                run.commit_context(context).await;
                Ok(())
            }
            Ok(Err(CallableError::Cancelled)) if run.is_cancel_requested() => {
                Err(Outcome::Cancelled {
                    node: Some(node_id.to_string()),
                })
            }
            Ok(Err(err)) => {
                let message = err.to_string();
                self.emit(
                    run,
                    NewEvent::error(
                        EventKind::NodeFailed,
                        format!("node '{node_id}' failed: {message}"),
                    )
                    .node(node_id)
                    .data(json!({ "kind": RunErrorKind::Callable, "error": message })),
                )
                .await;
                Err(Outcome::failed(RunErrorKind::Callable, message, Some(node_id)))
            }
            Err(_elapsed) => {
                let message = format!(
                    "node '{node_id}' timed out after {:.3}s",
                    step_timeout.as_secs_f64()
                );
                self.emit(
                    run,
                    NewEvent::error(EventKind::NodeFailed, message.clone())
                        .node(node_id)
                        .data(json!({ "kind": RunErrorKind::Timeout, "error": message })),
                )
                .await;
                Err(Outcome::failed(RunErrorKind::Timeout, message, Some(node_id)))
            }
        }
    }

    /// Choose the outgoing edge of `node`: the first true branch, else a
    /// loop edge that has not exited, else the sequential edge. `Ok(None)`
    /// means the run is done.
    async fn select_edge(
        &self,
        run: &RunHandle,
        graph: &ValidatedGraph,
        resolved: &ResolvedCallables,
        node: &str,
    ) -> Result<Option<usize>, Outcome> {
        let routes = graph.routes(node);

        if !routes.branches.is_empty() {
            let context = run.context().await;
            for &edge_index in &routes.branches {
                let Some(EdgeKind::Branch { condition }) = graph.edge(edge_index).map(|e| &e.kind)
                else {
                    continue;
                };

                let result = match condition {
                    Condition::Expression(expr) => expr.test(&context).map_err(|e| e.to_string()),
                    Condition::Predicate(name) => match resolved.predicate(name) {
                        Some(predicate) => predicate.check(&context).await.map_err(|e| e.to_string()),
                        None => Err(CallableError::Unknown(name.clone()).to_string()),
                    },
                };

                let taken = match result {
                    Ok(taken) => taken,
                    Err(message) => {
                        return Err(Outcome::eval_failed(
                            format!("condition '{condition}' failed: {message}"),
                            node,
                            edge_index,
                        ));
                    }
                };

                self.emit(
                    run,
                    NewEvent::debug(
                        EventKind::BranchEvaluated,
                        format!("branch #{edge_index} '{condition}' -> {taken}"),
                    )
                    .node(node)
                    .data(json!({
                        "edge_index": edge_index,
                        "condition": condition.to_string(),
                        "result": taken,
                    })),
                )
                .await;

                if taken {
                    return Ok(Some(edge_index));
                }
            }
        }

        // No branch fired: loops next, then the sequential fallback.

        for &edge_index in &routes.loops {
            let Some(EdgeKind::Loop {
                max_iterations,
                until,
            }) = graph.edge(edge_index).map(|e| &e.kind)
            else {
                continue;
            };

            // Safe point before deciding to loop again.
            if run.is_cancel_requested() {
                return Err(Outcome::Cancelled {
                    node: Some(node.to_string()),
                });
            }

            let iteration = run.increment_loop(edge_index).await;

            let until_met = match until {
                Some(expr) => match expr.test(&run.context().await) {
                    Ok(met) => met,
                    Err(err) => {
                        return Err(Outcome::eval_failed(
                            format!("until_expression '{}' failed: {err}", expr.source()),
                            node,
                            edge_index,
                        ));
                    }
                },
                None => false,
            };

            let exit_reason = if until_met {
                Some("until_expression satisfied")
            } else if iteration > *max_iterations {
                Some("max_iterations reached")
            } else {
                None
            };

            match exit_reason {
                Some(reason) => {
                    self.emit(
                        run,
                        NewEvent::info(
                            EventKind::LoopExited,
                            format!("loop #{edge_index} exited: {reason}"),
                        )
                        .node(node)
                        .data(json!({
                            "edge_index": edge_index,
                            "iteration": iteration,
                            "max_iterations": max_iterations,
                            "reason": reason,
                        })),
                    )
                    .await;
                }
                None => {
                    self.emit(
                        run,
                        NewEvent::info(
                            EventKind::LoopIteration,
                            format!("loop #{edge_index} iteration {iteration}/{max_iterations}"),
                        )
                        .node(node)
                        .data(json!({
                            "edge_index": edge_index,
                            "iteration": iteration,
                            "max_iterations": max_iterations,
                        })),
                    )
                    .await;
                    return Ok(Some(edge_index));
                }
            }
        }

        Ok(routes.sequential)
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    /// Publish the terminal event, then make the status visible, then close
    /// the log stream.
    async fn conclude(&self, run: &RunHandle, outcome: Outcome, elapsed: Duration) {
        let steps = run.steps().await;
        let (status, failure) = match outcome {
            Outcome::Completed { node } => {
                self.emit(
                    run,
                    NewEvent::info(EventKind::RunCompleted, format!("run completed at node '{node}'"))
                        .node(node.as_str())
                        .data(json!({ "steps": steps })),
                )
                .await;
                tracing::info!(
                    run_id = %run.id(),
                    steps,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "run completed"
                );
                (RunStatus::Completed, None)
            }
            Outcome::Cancelled { node } => {
                let mut event = NewEvent::warn(EventKind::RunCancelled, "run cancelled")
                    .data(json!({ "steps": steps }));
                if let Some(node) = node {
                    event = event.node(node);
                }
                self.emit(run, event).await;
                tracing::info!(run_id = %run.id(), steps, "run cancelled");
                (RunStatus::Cancelled, None)
            }
            Outcome::Failed(failure) => {
                let mut event = NewEvent::error(EventKind::RunFailed, failure.to_string()).data(json!({
                    "kind": failure.kind,
                    "message": failure.message,
                    "edge_index": failure.edge_index,
                    "steps": steps,
                }));
                if let Some(node) = &failure.node_id {
                    event = event.node(node.as_str());
                }
                self.emit(run, event).await;
                tracing::warn!(
                    run_id = %run.id(),
                    kind = %failure.kind,
                    error = failure.message.as_str(),
                    "run failed"
                );
                (RunStatus::Failed, Some(failure))
            }
        };

        run.finish(status, failure).await;
        run.log().finish(status).await;
    }

    async fn emit(&self, run: &RunHandle, event: NewEvent) {
        run.log().publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::StreamExt;
    use serde_json::{Value, json};
    use stepflow_types::event::{LogEvent, StreamMessage};
    use stepflow_types::graph::{Context, GraphDefinition};
    use tokio::sync::Notify;

    use super::*;
    use crate::callable::{FnPredicate, FnStep, SyncFnStep};
    use crate::event::RunLog;
    use crate::graph::validate;

    fn graph(value: Value) -> Arc<ValidatedGraph> {
        let def: GraphDefinition = serde_json::from_value(value).unwrap();
        Arc::new(validate(&def).unwrap())
    }

    fn context(value: Value) -> Context {
        match value {
            Value::Object(map) => map,
            other => panic!("context must be an object, got {other}"),
        }
    }

    fn new_run(graph: &Arc<ValidatedGraph>, ctx: Context) -> Arc<RunHandle> {
        let log = Arc::new(RunLog::new(Uuid::now_v7(), 64));
        Arc::new(RunHandle::new(Arc::clone(graph), ctx, log))
    }

    fn engine(registry: CallableRegistry) -> Engine {
        Engine::new(Arc::new(registry), EngineConfig::default())
    }

    fn noop_registry(names: &[&str]) -> CallableRegistry {
        let mut registry = CallableRegistry::new();
        for name in names {
            registry.register_step(*name, SyncFnStep::new(Ok)).unwrap();
        }
        registry
    }

    fn visited(events: &[LogEvent]) -> Vec<String> {
        events
            .iter()
            .filter(|e| e.kind == EventKind::NodeStarted)
            .filter_map(|e| e.node_id.clone())
            .collect()
    }

    fn count(events: &[LogEvent], kind: EventKind) -> usize {
        events.iter().filter(|e| e.kind == kind).count()
    }

    fn code_review_graph() -> Arc<ValidatedGraph> {
        graph(json!({
            "id": "code_review",
            "name": "Code review",
            "start_node": "submit",
            "nodes": [
                {"id": "submit", "callable": "review.submit"},
                {"id": "review", "callable": "review.review"},
                {"id": "fix", "callable": "review.fix"},
                {"id": "approve", "callable": "review.approve"}
            ],
            "edges": [
                {"from": "submit", "to": "review"},
                {"from": "review", "to": "fix", "type": "loop",
                 "loop": {"max_iterations": 3, "until_expression": "issues_open == 0"}},
                {"from": "review", "to": "approve"},
                {"from": "fix", "to": "review"}
            ]
        }))
    }

    /// `fixes` decides whether `review.fix` actually closes an issue.
    fn code_review_registry(fixes: bool) -> CallableRegistry {
        let mut registry = CallableRegistry::new();
        registry
            .register_step(
                "review.submit",
                SyncFnStep::new(|mut ctx: Context| {
                    ctx.insert("submitted".to_string(), json!(true));
                    Ok(ctx)
                }),
            )
            .unwrap();
        registry
            .register_step(
                "review.review",
                SyncFnStep::new(|mut ctx: Context| {
                    let reviews = ctx.get("reviews").and_then(Value::as_i64).unwrap_or(0);
                    ctx.insert("reviews".to_string(), json!(reviews + 1));
                    Ok(ctx)
                }),
            )
            .unwrap();
        registry
            .register_step(
                "review.fix",
                SyncFnStep::new(move |mut ctx: Context| {
                    if fixes {
                        let open = ctx.get("issues_open").and_then(Value::as_i64).unwrap_or(0);
                        ctx.insert("issues_open".to_string(), json!((open - 1).max(0)));
                    }
                    Ok(ctx)
                }),
            )
            .unwrap();
        registry
            .register_step(
                "review.approve",
                SyncFnStep::new(|mut ctx: Context| {
                    ctx.insert("approved".to_string(), json!(true));
                    Ok(ctx)
                }),
            )
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn test_linear_graph_starts_at_start_node() {
        let g = graph(json!({
            "id": "linear", "name": "linear", "start_node": "a",
            "nodes": [
                {"id": "b", "callable": "tools.noop"},
                {"id": "a", "callable": "tools.noop"}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));
        let run = new_run(&g, Context::new());
        let snapshot = engine(noop_registry(&["tools.noop"]))
            .execute(Arc::clone(&run))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(snapshot.steps, 2);
        assert_eq!(snapshot.current_node.as_deref(), Some("b"));
        assert!(snapshot.failure.is_none());
        assert!(snapshot.finished_at.is_some());

        let events = &snapshot.logs;
        assert_eq!(events[0].kind, EventKind::RunStarted);
        assert_eq!(events[0].node_id.as_deref(), Some("a"));
        assert_eq!(events[1].kind, EventKind::NodeStarted);
        assert_eq!(events[1].node_id.as_deref(), Some("a"));
        assert_eq!(visited(events), vec!["a", "b"]);
        assert_eq!(events.last().unwrap().kind, EventKind::RunCompleted);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.seq, i as u64);
        }

        assert_eq!(run.log().status().await, Some(RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_code_review_single_fix_cycle() {
        let run = new_run(&code_review_graph(), context(json!({"issues_open": 1})));
        let snapshot = engine(code_review_registry(true))
            .execute(run)
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(
            visited(&snapshot.logs),
            vec!["submit", "review", "fix", "review", "approve"]
        );
        assert_eq!(count(&snapshot.logs, EventKind::LoopIteration), 1);
        assert_eq!(count(&snapshot.logs, EventKind::LoopExited), 1);
        assert_eq!(snapshot.loop_counters.get(&1), Some(&2));
        assert_eq!(snapshot.context["issues_open"], json!(0));
        assert_eq!(snapshot.context["reviews"], json!(2));
        assert_eq!(snapshot.context["approved"], json!(true));

        let exited = snapshot
            .logs
            .iter()
            .find(|e| e.kind == EventKind::LoopExited)
            .unwrap();
        assert_eq!(
            exited.data.as_ref().unwrap()["reason"],
            json!("until_expression satisfied")
        );
    }

    #[tokio::test]
    async fn test_loop_runs_at_most_max_iterations() {
        let run = new_run(&code_review_graph(), context(json!({"issues_open": 2})));
        let snapshot = engine(code_review_registry(false))
            .execute(run)
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Completed);
        let path = visited(&snapshot.logs);
        assert_eq!(path.iter().filter(|n| *n == "fix").count(), 3);
        assert_eq!(path.iter().filter(|n| *n == "review").count(), 4);
        assert_eq!(path.last().map(String::as_str), Some("approve"));
        assert_eq!(count(&snapshot.logs, EventKind::LoopIteration), 3);
        assert_eq!(snapshot.context["issues_open"], json!(2));

        let exited = snapshot
            .logs
            .iter()
            .find(|e| e.kind == EventKind::LoopExited)
            .unwrap();
        assert_eq!(
            exited.data.as_ref().unwrap()["reason"],
            json!("max_iterations reached")
        );
    }

    #[tokio::test]
    async fn test_loop_and_branch_share_a_node() {
        let g = graph(json!({
            "id": "mixed", "name": "mixed", "start_node": "review",
            "nodes": [
                {"id": "review", "callable": "tools.noop"},
                {"id": "fix", "callable": "tools.noop"},
                {"id": "escalate", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "review", "to": "fix", "type": "loop", "loop": {"max_iterations": 2}},
                {"from": "review", "to": "escalate", "type": "branch",
                 "condition": {"expression": "context.get('escalate', false)"}},
                {"from": "fix", "to": "review"}
            ]
        }));
        let engine = engine(noop_registry(&["tools.noop"]));

        // No branch fires, so the loop is taken until its cap.
        let snapshot = engine
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(
            visited(&snapshot.logs),
            vec!["review", "fix", "review", "fix", "review"]
        );
        assert_eq!(count(&snapshot.logs, EventKind::LoopIteration), 2);
        assert_eq!(count(&snapshot.logs, EventKind::LoopExited), 1);
        assert_eq!(count(&snapshot.logs, EventKind::BranchEvaluated), 3);
        assert_eq!(snapshot.loop_counters.get(&0), Some(&3));

        // A true branch wins over the loop.
        let snapshot = engine
            .execute(new_run(&g, context(json!({"escalate": true}))))
            .await
            .unwrap();
        assert_eq!(visited(&snapshot.logs), vec!["review", "escalate"]);
        assert!(snapshot.loop_counters.is_empty());
    }

    fn branching_graph() -> Arc<ValidatedGraph> {
        graph(json!({
            "id": "branching", "name": "branching", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "tools.noop"},
                {"id": "b", "callable": "tools.noop"},
                {"id": "c", "callable": "tools.noop"},
                {"id": "d", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "a", "to": "b", "type": "branch", "condition": {"expression": "x > 0"}},
                {"from": "a", "to": "c", "type": "branch", "condition": {"expression": "x > 1"}},
                {"from": "a", "to": "d"}
            ]
        }))
    }

    #[tokio::test]
    async fn test_first_true_branch_wins() {
        let engine = engine(noop_registry(&["tools.noop"]));

        let snapshot = engine
            .execute(new_run(&branching_graph(), context(json!({"x": 5}))))
            .await
            .unwrap();
        assert_eq!(visited(&snapshot.logs), vec!["a", "b"]);
        assert_eq!(count(&snapshot.logs, EventKind::BranchEvaluated), 1);

        let snapshot = engine
            .execute(new_run(&branching_graph(), context(json!({"x": 0}))))
            .await
            .unwrap();
        assert_eq!(visited(&snapshot.logs), vec!["a", "d"]);
        assert_eq!(count(&snapshot.logs, EventKind::BranchEvaluated), 2);
    }

    #[tokio::test]
    async fn test_predicate_branch() {
        let g = graph(json!({
            "id": "pred", "name": "pred", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "tools.noop"},
                {"id": "ready", "callable": "tools.noop"},
                {"id": "waiting", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "a", "to": "ready", "type": "branch", "condition": {"callable": "is_ready"}},
                {"from": "a", "to": "waiting"}
            ]
        }));
        let mut registry = noop_registry(&["tools.noop"]);
        registry
            .register_predicate(
                "is_ready",
                FnPredicate::new(|ctx: &Context| {
                    Ok(ctx.get("ready").and_then(Value::as_bool).unwrap_or(false))
                }),
            )
            .unwrap();
        let engine = engine(registry);

        let snapshot = engine
            .execute(new_run(&g, context(json!({"ready": true}))))
            .await
            .unwrap();
        assert_eq!(visited(&snapshot.logs), vec!["a", "ready"]);

        let snapshot = engine.execute(new_run(&g, Context::new())).await.unwrap();
        assert_eq!(visited(&snapshot.logs), vec!["a", "waiting"]);
    }

    #[tokio::test]
    async fn test_eval_error_is_attributed_to_edge() {
        let g = graph(json!({
            "id": "eval", "name": "eval", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "tools.noop"},
                {"id": "b", "callable": "tools.noop"},
                {"id": "c", "callable": "tools.noop"}
            ],
            "edges": [
                {"from": "a", "to": "c"},
                {"from": "a", "to": "b", "type": "branch",
                 "condition": {"expression": "context['missing'] > 1"}}
            ]
        }));
        let snapshot = engine(noop_registry(&["tools.noop"]))
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Failed);
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, RunErrorKind::Eval);
        assert_eq!(failure.node_id.as_deref(), Some("a"));
        assert_eq!(failure.edge_index, Some(1));
        assert_eq!(visited(&snapshot.logs), vec!["a"]);
        assert_eq!(snapshot.logs.last().unwrap().kind, EventKind::RunFailed);
    }

    #[tokio::test]
    async fn test_callable_error_keeps_previous_context() {
        let g = graph(json!({
            "id": "fail", "name": "fail", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "mark"},
                {"id": "b", "callable": "boom"},
                {"id": "c", "callable": "mark"}
            ],
            "edges": [{"from": "a", "to": "b"}, {"from": "b", "to": "c"}]
        }));
        let mut registry = CallableRegistry::new();
        registry
            .register_step(
                "mark",
                SyncFnStep::new(|mut ctx: Context| {
                    ctx.insert("marked".to_string(), json!(true));
                    Ok(ctx)
                }),
            )
            .unwrap();
        registry
            .register_step(
                "boom",
                SyncFnStep::new(|_ctx| Err(CallableError::failed("boom"))),
            )
            .unwrap();

        let snapshot = engine(registry)
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Failed);
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, RunErrorKind::Callable);
        assert_eq!(failure.node_id.as_deref(), Some("b"));
        assert_eq!(failure.message, "boom");
        assert_eq!(snapshot.context, context(json!({"marked": true})));
        assert_eq!(visited(&snapshot.logs), vec!["a", "b"]);
        assert_eq!(count(&snapshot.logs, EventKind::NodeFailed), 1);
    }

    #[tokio::test]
    async fn test_step_timeout() {
        let g = graph(json!({
            "id": "slow", "name": "slow", "start_node": "slow",
            "nodes": [{"id": "slow", "callable": "sleep"}]
        }));
        let mut registry = CallableRegistry::new();
        registry
            .register_step(
                "sleep",
                FnStep::new(|step: StepContext| async move {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, CallableError>(step.context)
                }),
            )
            .unwrap();
        let config = EngineConfig {
            step_timeout_secs: 0.05,
            ..EngineConfig::default()
        };

        let snapshot = Engine::new(Arc::new(registry), config)
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Failed);
        let failure = snapshot.failure.unwrap();
        assert_eq!(failure.kind, RunErrorKind::Timeout);
        assert_eq!(failure.node_id.as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn test_cancel_between_steps() {
        let g = graph(json!({
            "id": "cancel", "name": "cancel", "start_node": "a",
            "nodes": [
                {"id": "a", "callable": "wait"},
                {"id": "b", "callable": "count"}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }));

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut registry = CallableRegistry::new();
        let (on_enter, on_release) = (Arc::clone(&entered), Arc::clone(&release));
        registry
            .register_step(
                "wait",
                FnStep::new(move |step: StepContext| {
                    let (on_enter, on_release) = (Arc::clone(&on_enter), Arc::clone(&on_release));
                    async move {
                        on_enter.notify_one();
                        on_release.notified().await;
                        Ok::<_, CallableError>(step.context)
                    }
                }),
            )
            .unwrap();
        let counter = Arc::clone(&calls);
        registry
            .register_step(
                "count",
                SyncFnStep::new(move |ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ctx)
                }),
            )
            .unwrap();

        let run = new_run(&g, Context::new());
        let task = engine(registry).spawn(Arc::clone(&run));

        entered.notified().await;
        assert_eq!(run.request_cancel().await, RunStatus::Running);
        release.notify_one();

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        assert!(snapshot.cancel_requested);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(visited(&snapshot.logs), vec!["a"]);
        assert_eq!(count(&snapshot.logs, EventKind::NodeCompleted), 1);
        assert_eq!(snapshot.logs.last().unwrap().kind, EventKind::RunCancelled);
    }

    #[tokio::test]
    async fn test_cooperative_cancel_inside_step() {
        let g = graph(json!({
            "id": "coop", "name": "coop", "start_node": "a",
            "nodes": [{"id": "a", "callable": "watch"}]
        }));

        let entered = Arc::new(Notify::new());
        let on_enter = Arc::clone(&entered);
        let mut registry = CallableRegistry::new();
        registry
            .register_step(
                "watch",
                FnStep::new(move |step: StepContext| {
                    let on_enter = Arc::clone(&on_enter);
                    async move {
                        on_enter.notify_one();
                        step.cancel.cancelled().await;
                        Err::<Context, _>(CallableError::Cancelled)
                    }
                }),
            )
            .unwrap();

        let run = new_run(&g, Context::new());
        let task = engine(registry).spawn(Arc::clone(&run));
        entered.notified().await;
        run.request_cancel().await;

        let snapshot = task.await.unwrap().unwrap();
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        assert!(snapshot.failure.is_none());
        assert_eq!(count(&snapshot.logs, EventKind::NodeFailed), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_invokes_nothing() {
        let g = branching_graph();
        let run = new_run(&g, context(json!({"x": 1})));
        assert_eq!(run.request_cancel().await, RunStatus::Pending);

        let snapshot = engine(noop_registry(&["tools.noop"]))
            .execute(run)
            .await
            .unwrap();
        assert_eq!(snapshot.status, RunStatus::Cancelled);
        let kinds: Vec<EventKind> = snapshot.logs.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RunStarted, EventKind::RunCancelled]);
    }

    #[tokio::test]
    async fn test_unknown_callable_fails_before_any_node() {
        let g = graph(json!({
            "id": "unknown", "name": "unknown", "start_node": "a",
            "nodes": [{"id": "a", "callable": "missing.step"}]
        }));
        let snapshot = engine(CallableRegistry::new())
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Failed);
        assert_eq!(snapshot.steps, 0);
        assert_eq!(
            snapshot.failure.as_ref().map(|f| f.kind),
            Some(RunErrorKind::UnknownCallable)
        );
        let kinds: Vec<EventKind> = snapshot.logs.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::RunStarted, EventKind::RunFailed]);
    }

    #[tokio::test]
    async fn test_execution_ceiling() {
        let g = graph(json!({
            "id": "spin", "name": "spin", "start_node": "a",
            "nodes": [{"id": "a", "callable": "tools.noop"}],
            "edges": [{"from": "a", "to": "a", "type": "loop", "loop": {"max_iterations": 100}}]
        }));
        let config = EngineConfig {
            max_steps: 3,
            ..EngineConfig::default()
        };
        let snapshot = Engine::new(Arc::new(noop_registry(&["tools.noop"])), config)
            .execute(new_run(&g, Context::new()))
            .await
            .unwrap();

        assert_eq!(snapshot.status, RunStatus::Failed);
        assert_eq!(snapshot.steps, 3);
        assert_eq!(
            snapshot.failure.map(|f| f.kind),
            Some(RunErrorKind::ExecutionCeilingExceeded)
        );
    }

    #[tokio::test]
    async fn test_runs_are_deterministic() {
        fn trace(events: &[LogEvent]) -> Vec<(u64, EventKind, Option<String>, String, Option<Value>)> {
            events
                .iter()
                .map(|e| (e.seq, e.kind, e.node_id.clone(), e.message.clone(), e.data.clone()))
                .collect()
        }

        let engine = engine(code_review_registry(true));
        let first = engine
            .execute(new_run(&code_review_graph(), context(json!({"issues_open": 2}))))
            .await
            .unwrap();
        let second = engine
            .execute(new_run(&code_review_graph(), context(json!({"issues_open": 2}))))
            .await
            .unwrap();

        assert_eq!(first.context, second.context);
        assert_eq!(trace(&first.logs), trace(&second.logs));
    }

    #[tokio::test]
    async fn test_run_cannot_be_executed_twice() {
        let g = branching_graph();
        let run = new_run(&g, context(json!({"x": 1})));
        let engine = engine(noop_registry(&["tools.noop"]));
        engine.execute(Arc::clone(&run)).await.unwrap();

        let err = engine.execute(run).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::AlreadyStarted {
                status: RunStatus::Completed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_subscriber_replays_finished_run() {
        let g = branching_graph();
        let run = new_run(&g, context(json!({"x": 0})));
        let snapshot = engine(noop_registry(&["tools.noop"]))
            .execute(Arc::clone(&run))
            .await
            .unwrap();

        let messages: Vec<StreamMessage> = run.log().subscribe().collect().await;
        assert_eq!(messages.len(), snapshot.logs.len() + 1);
        assert!(matches!(
            messages.last(),
            Some(StreamMessage::Status {
                status: RunStatus::Completed,
                ..
            })
        ));
    }
}
