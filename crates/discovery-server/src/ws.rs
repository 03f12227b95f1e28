//! WebSocket stream
//!
//! A client first receives a `state` snapshot, then every bus event as its
//! envelope `{seq, type, data, timestamp}`. Commands arrive as tagged JSON
//! and run on their own task, so a long cycle never stalls the event feed.
//! A command's outcome reaches the client through the events it publishes;
//! only rejections are answered directly with an `error` message.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, StateSnapshot};

/// Commands accepted from clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    RunCycle,
    QueryAgent {
        agent: String,
        question: String,
    },
    StartAuto {
        #[serde(default)]
        interval_ms: Option<u64>,
    },
    StopAuto,
}

/// Messages sent to a client outside the event feed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    State(StateSnapshot),
    Error { error: String, code: String },
}

impl From<ApiError> for ServerMessage {
    fn from(e: ApiError) -> Self {
        ServerMessage::Error {
            code: e.code().to_string(),
            error: e.to_string(),
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    // Subscribe before the snapshot so nothing published in between is lost.
    let mut events = state.events.subscribe();
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMessage>(16);
    info!(clients = state.events.subscriber_count(), "WebSocket client connected");

    let snapshot = ServerMessage::State(state.snapshot().await);
    match serde_json::to_string(&snapshot) {
        Ok(text) => {
            if sink.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
        Err(e) => warn!(error = %e, "Failed to encode state snapshot"),
    }

    let mut forward = tokio::spawn(async move {
        loop {
            let encoded = tokio::select! {
                received = events.recv() => match received {
                    Ok(envelope) => serde_json::to_string(&envelope),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "WebSocket client lagged behind the event bus");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                Some(message) = direct_rx.recv() => serde_json::to_string(&message),
            };
            let text = match encoded {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to encode outgoing message");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut forward => break,
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let state = state.clone();
                    let replies = direct_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = dispatch(&state, &text).await {
                            debug!(error = %e, "WebSocket command rejected");
                            let _ = replies.send(e.into()).await;
                        }
                    });
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    forward.abort();
    info!("WebSocket client disconnected");
}

/// Decode and execute one client command.
pub async fn dispatch(state: &AppState, text: &str) -> ApiResult<()> {
    let command: ClientCommand = serde_json::from_str(text)
        .map_err(|e| ApiError::BadRequest(format!("invalid command: {e}")))?;
    debug!(?command, "WebSocket command");

    match command {
        ClientCommand::RunCycle => {
            let mut slot = state.try_orchestrator()?;
            let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
            orchestrator.run_cycle().await?;
        }
        ClientCommand::QueryAgent { agent, question } => {
            let mut slot = state.try_orchestrator()?;
            let orchestrator = slot.as_mut().ok_or(ApiError::NotInitialized)?;
            orchestrator.query_agent(&agent, &question).await?;
        }
        ClientCommand::StartAuto { interval_ms } => {
            state.start_auto(interval_ms).await?;
        }
        ClientCommand::StopAuto => {
            state.stop_auto().await;
        }
    }
    Ok(())
}
