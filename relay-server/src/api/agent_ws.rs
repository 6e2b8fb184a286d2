//! WebSocket endpoint agents dial into
//!
//! The upgrade is refused with a 401 problem response unless the request
//! carries a known `x-client-id` and its bearer token. Once upgraded, one task
//! per connection pumps hub-queued frames out and agent frames in.

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;

use gym_bridge_protocol::constants::parse_bearer;
use gym_bridge_protocol::{AgentMessage, HEADER_AUTHORIZATION, HEADER_CLIENT_ID};

use crate::agent_hub::{AgentHub, OutboundFrame};
use crate::api::{AppState, ProblemDetails};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub async fn agent_ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(agent_id) = header(&headers, HEADER_CLIENT_ID).map(str::to_string) else {
        tracing::warn!("Agent connection rejected: missing {} header", HEADER_CLIENT_ID);
        return ProblemDetails::unauthorized("Missing x-client-id header").into_response();
    };

    let Some(token) = header(&headers, HEADER_AUTHORIZATION).and_then(parse_bearer) else {
        tracing::warn!("Agent connection rejected: {} sent no token", agent_id);
        return ProblemDetails::unauthorized("Authorization token required").into_response();
    };

    let gym_id = match state.db.authenticate_agent(&agent_id, token).await {
        Ok(Some(gym_id)) => gym_id,
        Ok(None) => {
            tracing::warn!("Agent connection rejected: invalid credentials for {}", agent_id);
            return ProblemDetails::unauthorized("Invalid agent credentials").into_response();
        }
        Err(e) => {
            tracing::error!("Failed to authenticate agent {}: {}", agent_id, e);
            return ProblemDetails::internal_error("Failed to authenticate agent").into_response();
        }
    };

    let hub = state.hub.clone();
    let ping_interval = state.config.bridge.ping_interval();
    ws.on_upgrade(move |socket| handle_agent_socket(socket, hub, agent_id, gym_id, ping_interval))
}

async fn handle_agent_socket(
    socket: WebSocket,
    hub: AgentHub,
    agent_id: String,
    gym_id: i64,
    ping_interval: Duration,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connection_id = hub.register(&agent_id, gym_id, tx).await;

    let mut ping = tokio::time::interval(ping_interval);
    // First tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = sender.send(Message::Text(text)).await {
                        tracing::warn!("Failed to send to agent {}: {}", agent_id, e);
                        break;
                    }
                }
                Some(OutboundFrame::Close { code, reason }) => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    tracing::warn!("Ping to agent {} failed", agent_id);
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    hub.touch(&agent_id).await;
                    handle_agent_frame(&hub, &agent_id, &text).await;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                    hub.touch(&agent_id).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!("Ignoring binary frame from agent {}", agent_id);
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(
                        "Agent {} closed the connection ({:?})",
                        agent_id,
                        frame.map(|f| f.code)
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error from agent {}: {}", agent_id, e);
                    break;
                }
                None => break,
            },
        }
    }

    hub.unregister(&agent_id, connection_id).await;
}

/// Route one text frame from an agent; malformed frames are logged and skipped
async fn handle_agent_frame(hub: &AgentHub, agent_id: &str, text: &str) {
    match serde_json::from_str::<AgentMessage>(text) {
        Ok(AgentMessage::Response(response)) => hub.handle_response(agent_id, response).await,
        Ok(AgentMessage::Board(event)) => hub.record_board(agent_id, event).await,
        Err(e) => {
            tracing::warn!("Malformed frame from agent {}: {} ({})", agent_id, e, text);
        }
    }
}
