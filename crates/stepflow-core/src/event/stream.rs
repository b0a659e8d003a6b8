//! Per-run log stream with replay.
//!
//! Every run owns a [`RunLog`]: its append-only event history, its terminal
//! status once reached, and a `tokio::sync::broadcast` channel for live
//! fan-out. Subscribing snapshots the history and registers the live
//! receiver under the same lock that `publish` takes, so a subscriber sees
//! every event exactly once and in `seq` order. A subscriber that falls
//! behind the broadcast buffer recovers the missed events from history.
//! Publishing never waits on subscribers.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::Stream;
use serde_json::Value;
use stepflow_types::event::{EventKind, LogEvent, LogLevel, StreamMessage};
use stepflow_types::run::RunStatus;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// Default live buffer per run.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no log stream for run {0}")]
    UnknownRun(Uuid),
}

// ---------------------------------------------------------------------------
// Event drafts
// ---------------------------------------------------------------------------

/// A log event before the stream assigns its `seq` and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub node_id: Option<String>,
    pub level: LogLevel,
    pub kind: EventKind,
    pub message: String,
    pub data: Option<Value>,
}

impl NewEvent {
    pub fn new(level: LogLevel, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            node_id: None,
            level,
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn info(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, kind, message)
    }

    pub fn debug(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, kind, message)
    }

    pub fn warn(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, kind, message)
    }

    pub fn error(kind: EventKind, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, kind, message)
    }

    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RunLogState {
    events: Vec<LogEvent>,
    status: Option<RunStatus>,
}

/// History, terminal status and live channel of a single run.
pub struct RunLog {
    run_id: Uuid,
    state: RwLock<RunLogState>,
    sender: broadcast::Sender<StreamMessage>,
}

impl RunLog {
    pub fn new(run_id: Uuid, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            run_id,
            state: RwLock::new(RunLogState::default()),
            sender,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append an event and fan it out. Returns `None` once the log is
    /// closed by [`RunLog::finish`].
    pub async fn publish(&self, draft: NewEvent) -> Option<LogEvent> {
        let mut state = self.state.write().await;
        if state.status.is_some() {
            tracing::warn!(
                run_id = %self.run_id,
                kind = ?draft.kind,
                "dropping log event published after terminal status"
            );
            return None;
        }

        let event = LogEvent {
            seq: state.events.len() as u64,
            timestamp: Utc::now(),
            run_id: self.run_id,
            node_id: draft.node_id,
            level: draft.level,
            kind: draft.kind,
            message: draft.message,
            data: draft.data,
        };
        state.events.push(event.clone());

        // No receivers is fine: history covers late subscribers.
        let _ = self.sender.send(StreamMessage::Log {
            event: event.clone(),
        });
        Some(event)
    }

    /// Record the terminal status and send the final stream message. Only
    /// the first call has an effect.
    pub async fn finish(&self, status: RunStatus) -> bool {
        let mut state = self.state.write().await;
        if state.status.is_some() {
            return false;
        }
        state.status = Some(status);
        let _ = self.sender.send(StreamMessage::Status {
            run_id: self.run_id,
            status,
        });
        true
    }

    /// Snapshot of the history so far.
    pub async fn events(&self) -> Vec<LogEvent> {
        self.state.read().await.events.clone()
    }

    /// Terminal status, once the log is closed.
    pub async fn status(&self) -> Option<RunStatus> {
        self.state.read().await.status
    }

    /// Replay then follow this log. The stream ends after the status message.
    pub fn subscribe(self: &Arc<Self>) -> impl Stream<Item = StreamMessage> + Send + use<> {
        let log = Arc::clone(self);

        async_stream::stream! {
            let (history, status, mut receiver) = {
                let state = log.state.read().await;
                let receiver = state.status.is_none().then(|| log.sender.subscribe());
                (state.events.clone(), state.status, receiver)
            };

            let mut next_seq = 0u64;
            for event in history {
                next_seq = event.seq + 1;
                yield StreamMessage::Log { event };
            }

            if let Some(status) = status {
                yield StreamMessage::Status { run_id: log.run_id, status };
                return;
            }

            let Some(receiver) = receiver.as_mut() else {
                return;
            };

            loop {
                match receiver.recv().await {
                    Ok(StreamMessage::Log { event }) => {
                        if event.seq < next_seq {
                            continue;
                        }
                        next_seq = event.seq + 1;
                        yield StreamMessage::Log { event };
                    }
                    Ok(message @ StreamMessage::Status { .. }) => {
                        yield message;
                        return;
                    }
                    Err(err) => {
                        if let broadcast::error::RecvError::Lagged(skipped) = err {
                            tracing::debug!(
                                run_id = %log.run_id,
                                skipped,
                                "log subscriber lagged, replaying from history"
                            );
                        }
                        let (missed, status) = {
                            let state = log.state.read().await;
                            let from = (next_seq as usize).min(state.events.len());
                            (state.events[from..].to_vec(), state.status)
                        };
                        for event in missed {
                            next_seq = event.seq + 1;
                            yield StreamMessage::Log { event };
                        }
                        if let Some(status) = status {
                            yield StreamMessage::Status { run_id: log.run_id, status };
                            return;
                        }
                        if matches!(err, broadcast::error::RecvError::Closed) {
                            return;
                        }
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog")
            .field("run_id", &self.run_id)
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// LogStream
// ---------------------------------------------------------------------------

/// Registry of run logs keyed by run id.
///
/// Cloning shares the underlying map.
#[derive(Clone)]
pub struct LogStream {
    logs: Arc<DashMap<Uuid, Arc<RunLog>>>,
    capacity: usize,
}

impl LogStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            logs: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Create the log for `run_id`, or return the existing one.
    pub fn open(&self, run_id: Uuid) -> Arc<RunLog> {
        self.logs
            .entry(run_id)
            .or_insert_with(|| Arc::new(RunLog::new(run_id, self.capacity)))
            .clone()
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<RunLog>> {
        self.logs.get(&run_id).map(|entry| Arc::clone(entry.value()))
    }

    pub async fn publish(&self, run_id: Uuid, draft: NewEvent) -> Result<Option<LogEvent>, StreamError> {
        let log = self.get(run_id).ok_or(StreamError::UnknownRun(run_id))?;
        Ok(log.publish(draft).await)
    }

    pub async fn finish(&self, run_id: Uuid, status: RunStatus) -> Result<bool, StreamError> {
        let log = self.get(run_id).ok_or(StreamError::UnknownRun(run_id))?;
        Ok(log.finish(status).await)
    }

    pub fn subscribe(
        &self,
        run_id: Uuid,
    ) -> Result<impl Stream<Item = StreamMessage> + Send + use<>, StreamError> {
        let log = self.get(run_id).ok_or(StreamError::UnknownRun(run_id))?;
        Ok(log.subscribe())
    }

    /// Drop the log of a run. Existing subscribers keep their handle.
    pub fn remove(&self, run_id: Uuid) -> bool {
        self.logs.remove(&run_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }
}

impl Default for LogStream {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_CAPACITY)
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream")
            .field("runs", &self.logs.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn seqs(messages: &[StreamMessage]) -> Vec<u64> {
        messages
            .iter()
            .filter_map(|m| match m {
                StreamMessage::Log { event } => Some(event.seq),
                StreamMessage::Status { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_publish_assigns_sequence() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        stream.open(run_id);

        for i in 0..3 {
            let event = stream
                .publish(run_id, NewEvent::info(EventKind::NodeStarted, format!("n{i}")).node("a"))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.seq, i);
            assert_eq!(event.node_id.as_deref(), Some("a"));
        }
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        assert_eq!(
            stream
                .publish(run_id, NewEvent::info(EventKind::RunStarted, "x"))
                .await
                .unwrap_err(),
            StreamError::UnknownRun(run_id)
        );
        assert!(stream.subscribe(run_id).is_err());
    }

    #[tokio::test]
    async fn test_subscribe_after_terminal_replays_history_then_status() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        let log = stream.open(run_id);
        log.publish(NewEvent::info(EventKind::RunStarted, "start")).await;
        log.publish(NewEvent::info(EventKind::RunCompleted, "done")).await;
        assert!(log.finish(RunStatus::Completed).await);

        let messages: Vec<StreamMessage> = stream.subscribe(run_id).unwrap().collect().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(seqs(&messages), vec![0, 1]);
        assert_eq!(
            messages[2],
            StreamMessage::Status {
                run_id,
                status: RunStatus::Completed
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_outlives_the_registry() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        let log = stream.open(run_id);
        let subscription = stream.subscribe(run_id).unwrap();
        drop(stream);

        log.publish(NewEvent::info(EventKind::RunStarted, "start")).await;
        log.finish(RunStatus::Completed).await;
        drop(log);

        let messages: Vec<StreamMessage> = subscription.collect().await;
        assert_eq!(seqs(&messages), vec![0]);
        assert!(messages.last().unwrap().is_status());
    }

    #[tokio::test]
    async fn test_live_subscriber_gets_replay_then_live_events() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        let log = stream.open(run_id);
        log.publish(NewEvent::info(EventKind::RunStarted, "start")).await;

        let subscriber = tokio::spawn(stream.subscribe(run_id).unwrap().collect::<Vec<_>>());

        tokio::time::sleep(Duration::from_millis(10)).await;
        log.publish(NewEvent::info(EventKind::NodeStarted, "a").node("a")).await;
        log.publish(NewEvent::info(EventKind::RunCompleted, "done")).await;
        log.finish(RunStatus::Completed).await;

        let messages = subscriber.await.unwrap();
        assert_eq!(seqs(&messages), vec![0, 1, 2]);
        assert!(messages.last().unwrap().is_status());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_see_identical_streams() {
        let stream = LogStream::default();
        let run_id = Uuid::now_v7();
        let log = stream.open(run_id);

        let first = tokio::spawn(stream.subscribe(run_id).unwrap().collect::<Vec<_>>());
        let second = tokio::spawn(stream.subscribe(run_id).unwrap().collect::<Vec<_>>());

        for i in 0..5 {
            log.publish(NewEvent::debug(EventKind::EdgeTaken, format!("e{i}"))).await;
        }
        log.finish(RunStatus::Cancelled).await;

        let a = first.await.unwrap();
        let b = second.await.unwrap();
        assert_eq!(a, b);
        assert_eq!(seqs(&a), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_recovers_from_history() {
        let stream = LogStream::new(2);
        let run_id = Uuid::now_v7();
        let log = stream.open(run_id);
        log.publish(NewEvent::debug(EventKind::RunStarted, "start")).await;

        // The first poll replays seq 0 and registers the live receiver; the
        // receiver then falls far behind its two-slot buffer.
        let mut subscription = Box::pin(stream.subscribe(run_id).unwrap());
        let first = subscription.next().await.unwrap();

        for i in 1..=20 {
            log.publish(NewEvent::debug(EventKind::EdgeTaken, format!("e{i}"))).await;
        }
        log.finish(RunStatus::Completed).await;

        let mut all = vec![first];
        all.extend(subscription.collect::<Vec<_>>().await);
        assert_eq!(seqs(&all), (0..=20).collect::<Vec<u64>>());
        assert!(all.last().unwrap().is_status());
        assert_eq!(all.iter().filter(|m| m.is_status()).count(), 1);
    }

    #[tokio::test]
    async fn test_publish_after_finish_is_dropped() {
        let log = RunLog::new(Uuid::now_v7(), 4);
        log.finish(RunStatus::Failed).await;
        assert!(log.publish(NewEvent::info(EventKind::NodeStarted, "late")).await.is_none());
        assert!(!log.finish(RunStatus::Completed).await);
        assert_eq!(log.status().await, Some(RunStatus::Failed));
        assert!(log.events().await.is_empty());
    }
}
