//! Live channel endpoint
//!
//! One WebSocket per user. The upgrade registers the user's channel with
//! the delivery router; the connection loop forwards routed events to the
//! client and feeds client commands back into the router. Disconnecting
//! (or losing the heartbeat) unregisters the channel, after which delivery
//! falls back to the poll path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppState;
use crate::delivery::{ClientCommand, ServerEvent};
use crate::error::{Error, Result};
use crate::models::User;

/// Server pings on this interval; two missed pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct ChannelParams {
    pub user_id: Uuid,
}

/// GET /ws?user_id=
///
/// The identity is asserted by the auth collaborator upstream; the server
/// only verifies it names a known user before upgrading.
pub async fn live_channel(
    ws: WebSocketUpgrade,
    Query(params): Query<ChannelParams>,
    State(state): State<AppState>,
) -> Result<Response> {
    let user = match state.directory.get_user(params.user_id).await {
        Ok(user) => user,
        Err(Error::UserNotFound) => return Err(Error::Unauthorized),
        Err(other) => return Err(other),
    };

    Ok(ws.on_upgrade(move |socket| handle_channel(socket, state, user)))
}

async fn handle_channel(socket: WebSocket, state: AppState, user: User) {
    let (mut sender, mut receiver) = socket.split();

    let ready = ServerEvent::Ready {
        user_id: user.id,
        username: user.username.clone(),
    };
    let Ok(payload) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
        return;
    }

    let (conn_id, mut events) = state.delivery.register(user.id);
    info!("{} ({}) connected to live channel", user.username, user.id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward routed events to the client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode channel event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout, dropping live channel");
                            break;
                        }
                    }
                    if sender.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client.
    let recv_state = state.clone();
    let recv_user = user.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_state, recv_user.id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) sent an unparseable command: {}",
                            recv_user.username, recv_user.id, e
                        );
                    }
                },
                WsMessage::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.delivery.unregister(user.id, conn_id);
    info!("{} ({}) disconnected from live channel", user.username, user.id);
}

async fn handle_command(state: &AppState, user_id: Uuid, cmd: ClientCommand) {
    match cmd {
        ClientCommand::PrivateMessage {
            receiver_id,
            message,
        } => match state.delivery.send(user_id, receiver_id, &message).await {
            Ok(stored) => {
                // immediate local echo without a round trip
                state
                    .delivery
                    .push(user_id, ServerEvent::MessageSent { message: stored });
            }
            Err(err) => {
                warn!("private_message from {} failed: {}", user_id, err);
                state.delivery.push(
                    user_id,
                    ServerEvent::Error {
                        kind: err.kind().to_string(),
                        message: err.to_string(),
                    },
                );
            }
        },
    }
}
