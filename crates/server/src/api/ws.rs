//! WebSocket support for real-time run progress.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use harvestline_core::{RunEvent, RunReport, RunState, StepResult};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message sent to clients for real-time updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// A pipeline run was started.
    RunStarted { run_id: Uuid },
    /// A step changed status (running, success, error, skipped).
    StepProgress { run_id: Uuid, result: StepResult },
    /// A run reached its final state.
    RunFinished {
        run_id: Uuid,
        state: RunState,
        report: RunReport,
    },
    /// Server heartbeat (sent periodically to keep connection alive).
    Heartbeat { timestamp: i64 },
}

impl WsMessage {
    fn kind(&self) -> &'static str {
        match self {
            WsMessage::RunStarted { .. } => "run_started",
            WsMessage::StepProgress { .. } => "step_progress",
            WsMessage::RunFinished { .. } => "run_finished",
            WsMessage::Heartbeat { .. } => "heartbeat",
        }
    }
}

impl From<RunEvent> for WsMessage {
    fn from(event: RunEvent) -> Self {
        match event {
            RunEvent::Started { run_id } => WsMessage::RunStarted { run_id },
            RunEvent::Step { run_id, result } => WsMessage::StepProgress { run_id, result },
            RunEvent::Finished {
                run_id,
                state,
                report,
            } => WsMessage::RunFinished {
                run_id,
                state,
                report,
            },
        }
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.runs().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!("WebSocket client connected");

    // Forward run events to this client
    let send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            let msg = tokio::select! {
                result = rx.recv() => match result {
                    Ok(event) => WsMessage::from(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged, skipped {} messages", n);
                        WS_LAG_EVENTS.inc();
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Run event channel closed");
                        break;
                    }
                },
                _ = heartbeat.tick() => WsMessage::Heartbeat {
                    timestamp: Utc::now().timestamp(),
                },
            };

            WS_MESSAGES_SENT.with_label_values(&[msg.kind()]).inc();
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, client disconnected");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize WsMessage: {}", e);
                }
            }
        }
    });

    // Handle incoming messages from client (ping/pong, close)
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!("Ignoring client text message: {}", text);
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_event_maps_to_tagged_message() {
        let run_id = Uuid::new_v4();
        let msg = WsMessage::from(RunEvent::Started { run_id });

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "run_started");
        assert_eq!(json["run_id"], run_id.to_string());
        assert_eq!(msg.kind(), "run_started");
    }

    #[test]
    fn test_heartbeat_serialization() {
        let json = serde_json::to_string(&WsMessage::Heartbeat { timestamp: 42 }).unwrap();
        assert_eq!(json, r#"{"type":"heartbeat","timestamp":42}"#);
    }
}
