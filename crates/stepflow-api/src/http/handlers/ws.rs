//! WebSocket handler streaming one run's log.
//!
//! `/ws/runs/{id}/logs` replays the run's full history, then follows live
//! events until the run reaches a terminal status:
//!
//! ```json
//! {"type":"log","event":{"seq":0,"kind":"run_started", ...}}
//! {"type":"status","run_id":"...","status":"completed"}
//! ```
//!
//! The server closes the socket after the status frame. An unknown run id is
//! closed immediately with a policy-violation code. Disconnecting does not
//! cancel the run.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use stepflow_types::event::StreamMessage;

use crate::state::AppState;

/// Incoming frame from a WebSocket client. Anything else is ignored.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Keep-alive ping. Server responds with `{"type":"pong"}`.
    Ping,
}

/// Upgrade an HTTP request to a WebSocket carrying the run's log.
pub async fn run_logs_ws(
    ws: WebSocketUpgrade,
    Path(run_id): Path<Uuid>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_run_logs(socket, state, run_id))
}

async fn stream_run_logs(socket: WebSocket, state: AppState, run_id: Uuid) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let stream = match state.run_service.subscribe(run_id).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::debug!(%run_id, error = %err, "rejecting log subscription");
            let _ = ws_sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: format!("unknown run {run_id}").into(),
                })))
                .await;
            return;
        }
    };
    let mut stream = std::pin::pin!(stream);

    loop {
        tokio::select! {
            // --- Branch 1: forward log messages to the client ---
            message = stream.next() => {
                let Some(message) = message else {
                    break;
                };
                let done = message.is_status();
                match encode(&message) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            // Client disconnected
                            return;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(%run_id, "Failed to serialize stream message: {err}");
                    }
                }
                if done {
                    break;
                }
            }

            // --- Branch 2: client frames ---
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&text, &mut ws_sender).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(%run_id, "log subscriber disconnected");
                        return;
                    }
                    Some(Err(err)) => {
                        tracing::debug!(%run_id, "WebSocket receive error: {err}");
                        return;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws_sender
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "run finished".into(),
        })))
        .await;
    tracing::debug!(%run_id, "log stream closed");
}

async fn handle_command(
    text: &str,
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) {
    match serde_json::from_str::<WsCommand>(text) {
        Ok(WsCommand::Ping) => {
            let pong = r#"{"type":"pong"}"#;
            if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                tracing::debug!("Failed to send pong (client disconnecting)");
            }
        }
        Err(err) => {
            tracing::debug!(raw = %text, error = %err, "Ignoring WebSocket frame");
        }
    }
}

/// Encode a message as it goes over the wire.
pub fn encode(message: &StreamMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};
    use stepflow_types::run::RunStatus;

    #[test]
    fn test_status_frame_format() {
        let run_id = Uuid::now_v7();
        let frame = encode(&StreamMessage::Status {
            run_id,
            status: RunStatus::Completed,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], json!("status"));
        assert_eq!(value["status"], json!("completed"));
    }

    #[test]
    fn test_ping_command_parses() {
        assert!(matches!(
            serde_json::from_str::<WsCommand>(r#"{"type":"ping"}"#),
            Ok(WsCommand::Ping)
        ));
        assert!(serde_json::from_str::<WsCommand>(r#"{"type":"cancel"}"#).is_err());
    }
}
