//! Run lifecycle types for stepflow.
//!
//! A run is one execution of a validated graph from an initial context to a
//! terminal status. `RunSnapshot` is the read-only view handed out to status
//! queries; the mutable run state lives in `stepflow-core`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::LogEvent;
use crate::graph::Context;

// ---------------------------------------------------------------------------
// Run Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a run.
///
/// `pending -> running -> {completed | failed | cancelled}`. Terminal states
/// are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Whether the status is one of the absorbing terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("invalid run status: '{other}'")),
        }
    }
}

/// Whether the caller waits for the run or gets the id back immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    #[default]
    Sync,
    Background,
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Classification of why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// Malformed graph. Normally rejected before any run starts.
    Validation,
    /// A branch condition or loop exit test could not be evaluated.
    Eval,
    /// A node's callable returned an error.
    Callable,
    /// A node's callable exceeded the per-step timeout.
    Timeout,
    /// A callable or predicate name is not registered.
    UnknownCallable,
    /// The global step ceiling was hit.
    ExecutionCeilingExceeded,
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunErrorKind::Validation => "validation",
            RunErrorKind::Eval => "eval",
            RunErrorKind::Callable => "callable",
            RunErrorKind::Timeout => "timeout",
            RunErrorKind::UnknownCallable => "unknown_callable",
            RunErrorKind::ExecutionCeilingExceeded => "execution_ceiling_exceeded",
        };
        write!(f, "{s}")
    }
}

/// The error that moved a run to `failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: RunErrorKind,
    pub message: String,
    /// Node being executed or routed from when the failure happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Declaration index of the edge whose condition failed, for `Eval`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_index: Option<usize>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(node) = &self.node_id {
            write!(f, " (node '{node}'")?;
            if let Some(edge) = self.edge_index {
                write!(f, ", edge #{edge}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a run, used for status queries and results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Graph being executed.
    pub graph_id: String,
    pub status: RunStatus,
    /// Latest context (the last successfully produced one on failure).
    pub context: Context,
    /// Node currently executing, or the node where the run ended.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
    /// Number of node invocations so far.
    pub steps: u64,
    /// Iteration counters keyed by loop edge index.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub loop_counters: BTreeMap<usize, u32>,
    /// Whether cancellation has been requested.
    pub cancel_requested: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Ordered log of the run.
    pub logs: Vec<LogEvent>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
