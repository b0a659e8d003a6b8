//! Log event types for the stepflow run log stream.
//!
//! `LogEvent` is the append-only record emitted by the engine for every step,
//! edge evaluation, loop decision and terminal transition. `StreamMessage` is
//! what subscribers receive: one `Log` per event followed by a single
//! terminal `Status`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::run::RunStatus;

/// Severity of a log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Machine-readable tag describing what a log event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    BranchEvaluated,
    EdgeTaken,
    LoopIteration,
    LoopExited,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

impl EventKind {
    /// Whether this event closes the run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventKind::RunCompleted | EventKind::RunFailed | EventKind::RunCancelled
        )
    }
}

/// A single entry in a run's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Position in the run's log, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub run_id: Uuid,
    /// None for run-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub kind: EventKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Message delivered to log stream subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// One log event.
    Log { event: LogEvent },
    /// Terminal status; always the last message of a stream.
    Status { run_id: Uuid, status: RunStatus },
}

impl StreamMessage {
    pub fn is_status(&self) -> bool {
        matches!(self, StreamMessage::Status { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_event() -> LogEvent {
        LogEvent {
            seq: 0,
            timestamp: Utc::now(),
            run_id: Uuid::now_v7(),
            node_id: Some("submit".to_string()),
            level: LogLevel::Info,
            kind: EventKind::NodeStarted,
            message: "node 'submit' started".to_string(),
            data: None,
        }
    }

    #[test]
    fn test_log_message_is_tagged() {
        let msg = StreamMessage::Log {
            event: sample_event(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "log");
        assert_eq!(value["event"]["kind"], "node_started");
        assert_eq!(value["event"]["node_id"], "submit");
        assert!(value["event"].get("data").is_none());
    }

    #[test]
    fn test_status_message_is_tagged() {
        let run_id = Uuid::now_v7();
        let msg = StreamMessage::Status {
            run_id,
            status: RunStatus::Cancelled,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "status", "run_id": run_id, "status": "cancelled"}));
        assert!(msg.is_status());
    }

    #[test]
    fn test_terminal_event_kinds() {
        assert!(EventKind::RunCompleted.is_terminal());
        assert!(EventKind::RunFailed.is_terminal());
        assert!(EventKind::RunCancelled.is_terminal());
        assert!(!EventKind::LoopExited.is_terminal());
    }
}
