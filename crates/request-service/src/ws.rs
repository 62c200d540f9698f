use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use futures_util::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use text2iac_common::{Error, RequestStatus, StatusUpdate};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::orchestrator::Orchestrator;
use crate::AppState;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages accepted from clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Unsubscribe {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Ping,
}

/// Messages pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    StatusUpdate {
        #[serde(rename = "requestId")]
        request_id: String,
        status: RequestStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Pong,
    Error {
        message: String,
    },
}

impl From<StatusUpdate> for ServerMessage {
    fn from(update: StatusUpdate) -> Self {
        ServerMessage::StatusUpdate {
            request_id: update.request_id,
            status: update.status,
            message: update.message,
            timestamp: update.timestamp,
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let rx = state.orchestrator.subscribe();
    run_socket_loop(sender, receiver, rx, &state.orchestrator).await;
}

/// Per-connection subscription state
#[derive(Debug, Default)]
pub struct Subscriptions {
    ids: HashSet<String>,
}

impl Subscriptions {
    pub fn contains(&self, request_id: &str) -> bool {
        self.ids.contains(request_id)
    }

    /// Apply one client text frame, returning the replies to send
    pub async fn handle_text(&mut self, text: &str, orchestrator: &Orchestrator) -> Vec<ServerMessage> {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                return vec![ServerMessage::Error {
                    message: format!("invalid message: {}", e),
                }]
            }
        };

        match message {
            ClientMessage::Ping => vec![ServerMessage::Pong],
            ClientMessage::Unsubscribe { request_id } => {
                self.ids.remove(&request_id);
                Vec::new()
            }
            ClientMessage::Subscribe { request_id } => {
                let mut replies = vec![ServerMessage::Subscribed {
                    request_id: request_id.clone(),
                }];

                match orchestrator.get_status(&request_id).await {
                    Ok(request) => replies.push(request.status_update().into()),
                    // Unknown ids may still be subscribed; nothing to report yet
                    Err(Error::NotFound(_)) => {}
                    Err(e) => warn!("Status lookup for subscriber failed: {}", e),
                }

                self.ids.insert(request_id);
                replies
            }
        }
    }
}

async fn send_json(sender: &mut SplitSink<WebSocket, Message>, message: &ServerMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize push message: {}", e);
            true
        }
    }
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards status updates for subscribed requests, answers client
/// messages, and drops the connection when no Pong arrives within
/// [`PONG_TIMEOUT`] of a Ping.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<StatusUpdate>,
    orchestrator: &Orchestrator,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;
    let mut subscriptions = Subscriptions::default();

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    debug!("WebSocket pong timeout, closing");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(update) => {
                        if !subscriptions.contains(&update.request_id) {
                            continue;
                        }
                        if !send_json(&mut sender, &update.into()).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket subscriber lagged, skipped {} updates", skipped);
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = subscriptions.handle_text(text.as_str(), orchestrator).await;
                        let mut open = true;
                        for reply in &replies {
                            if !send_json(&mut sender, reply).await {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}
