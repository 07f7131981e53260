//! Persistent command stream.
//!
//! An agent may open a WebSocket at `GET /api/commands/stream`; the server
//! pushes newly enqueued commands immediately and accepts result frames on
//! the same channel. The stream only reduces latency: state-machine
//! semantics are identical to the polling path, and on channel loss
//! outstanding `delivered` commands are reclaimed by the next poll.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::commands::{CommandEnvelope, CommandResultReport};

use super::auth::{authenticate, Identity};
use super::routes::commands::apply_result;
use super::state::ApiState;

/// Outstanding stream connections, one slot per agent (a reconnect
/// replaces the previous sender).
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RwLock<HashMap<String, mpsc::Sender<CommandEnvelope>>>>,
}

impl StreamRegistry {
    pub async fn register(&self, agent_id: &str) -> mpsc::Receiver<CommandEnvelope> {
        let (tx, rx) = mpsc::channel(32);
        self.inner.write().await.insert(agent_id.to_string(), tx);
        rx
    }

    pub async fn unregister(&self, agent_id: &str) {
        self.inner.write().await.remove(agent_id);
    }

    /// Push a command to a connected agent. False when the agent has no
    /// live stream (the polling path will deliver instead).
    pub async fn push(&self, agent_id: &str, envelope: CommandEnvelope) -> bool {
        let guard = self.inner.read().await;
        match guard.get(agent_id) {
            Some(tx) => tx.send(envelope).await.is_ok(),
            None => false,
        }
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// WebSocket upgrade handler.
///
/// `GET /api/commands/stream` (agent bearer auth)
pub async fn command_stream_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let agent_id = match authenticate(&state, &headers).await {
        Ok(Identity::Agent { agent_id }) => agent_id,
        Ok(Identity::Admin) => {
            return super::error::ApiError::forbidden("command stream is agent-only")
                .into_response()
        }
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_stream(socket, state, agent_id))
}

async fn handle_stream(socket: WebSocket, state: ApiState, agent_id: String) {
    info!("command stream opened for {agent_id}");

    let mut command_rx = state.streams.register(&agent_id).await;
    let (mut sender, mut receiver) = socket.split();

    let push_state = state.clone();
    let push_agent = agent_id.clone();
    let mut push_task = tokio::spawn(async move {
        while let Some(envelope) = command_rx.recv().await {
            let command_id = envelope.command_id;
            let Ok(text) = serde_json::to_string(&envelope) else {
                continue;
            };
            if sender.send(Message::Text(text)).await.is_err() {
                debug!("stream send failed, {push_agent} disconnected");
                break;
            }
            // Delivery means the frame left for the socket; the TTL sweep
            // surfaces agents that crash before executing.
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = push_state.store.mark_delivered(command_id, now).await {
                warn!("failed to mark command {command_id} delivered: {e}");
            }
        }
    });

    let result_state = state.clone();
    let result_agent = agent_id.clone();
    let mut result_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let report: CommandResultReport = match serde_json::from_str(&text) {
                        Ok(report) => report,
                        Err(e) => {
                            warn!("malformed result frame from {result_agent}: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = apply_result(&result_state, &result_agent, &report).await {
                        warn!(
                            "stream result for command {} rejected: {}",
                            report.command_id, e.message
                        );
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = (&mut push_task) => { result_task.abort(); }
        _ = (&mut result_task) => { push_task.abort(); }
    }

    state.streams.unregister(&agent_id).await;
    info!("command stream closed for {agent_id}");
}
