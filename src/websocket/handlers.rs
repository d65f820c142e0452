//! Connection gateway: per-socket session loop.
//!
//! A connection is useless until it is bound to a verified identity:
//! either a token presented at upgrade time (see `routes::wsroute`) or a
//! first `authenticate` frame. Frames arriving before that are answered
//! with an explicit `error` frame rather than dropped. Once bound, the
//! session multiplexes registry fan-out and inbound client frames until
//! the transport closes, then unwinds all registry and typing state.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use uuid::Uuid;

use crate::middleware::auth;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;
use crate::websocket::events::{self, ServerEvent};
use crate::websocket::message_types::ClientEvent;
use crate::websocket::ConnectionId;

pub async fn handle_socket(state: AppState, socket: WebSocket, identity: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match identity {
        Some(user_id) => user_id,
        None => match await_authenticate(&state, &mut sender, &mut receiver).await {
            Some(user_id) => user_id,
            None => {
                let _ = sender.send(Message::Close(None)).await;
                return;
            }
        },
    };

    let (conn, mut rx) = state.registry.register(user_id).await;
    crate::metrics::WS_CONNECTIONS.inc();

    send_event(&state, conn, &ServerEvent::Authenticated { user_id }).await;

    loop {
        tokio::select! {
            // Outbound: registry fan-out queued for this connection.
            maybe = rx.recv() => {
                match maybe {
                    Some(payload) => {
                        if sender.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // Inbound: client frames.
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(txt))) => {
                        match serde_json::from_str::<ClientEvent>(&txt) {
                            Ok(event) => handle_client_event(event, conn, user_id, &state).await,
                            Err(e) => {
                                tracing::debug!(%user_id, error = %e, "malformed client frame");
                                send_error(&state, conn, "malformed-frame", "frame is not a recognized event").await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by the transport
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let rooms = state.registry.unregister(conn).await;
    crate::metrics::WS_CONNECTIONS.dec();
    state
        .typing
        .connection_closed(&state.registry, &state.redis, &rooms, user_id)
        .await;
}

/// Pre-authentication phase: only an `authenticate` frame moves the
/// session forward. Anything else gets an error frame; an invalid token
/// or a closed transport ends the session.
async fn await_authenticate(
    state: &AppState,
    sender: &mut SplitSink<WebSocket, Message>,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<Uuid> {
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(txt)) => match serde_json::from_str::<ClientEvent>(&txt) {
                Ok(ClientEvent::Authenticate { token }) => {
                    match auth::verify_token(&token, &state.config.jwt_secret) {
                        Ok(user_id) => return Some(user_id),
                        Err(_) => {
                            send_raw_error(sender, "invalid-token", "token verification failed")
                                .await;
                            return None;
                        }
                    }
                }
                Ok(_) => {
                    send_raw_error(sender, "not-authenticated", "authenticate first").await;
                }
                Err(_) => {
                    send_raw_error(sender, "malformed-frame", "frame is not a recognized event")
                        .await;
                }
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

async fn handle_client_event(
    event: ClientEvent,
    conn: ConnectionId,
    user_id: Uuid,
    state: &AppState,
) {
    match event {
        ClientEvent::Authenticate { .. } => {
            send_error(state, conn, "already-authenticated", "connection is already bound").await;
        }

        ClientEvent::JoinConversation { conversation_id } => {
            // Room membership is gated on persisted conversation
            // membership, not on what the client claims.
            match ConversationService::is_member(&state.db, conversation_id, user_id).await {
                Ok(true) => state.registry.join(conversation_id, conn).await,
                Ok(false) => {
                    send_error(state, conn, "not-a-member", "user is not in this conversation")
                        .await;
                }
                Err(e) => {
                    tracing::error!(%user_id, %conversation_id, error = %e, "membership check failed");
                    send_error(state, conn, "internal-error", "membership check failed").await;
                }
            }
        }

        ClientEvent::LeaveConversation { conversation_id } => {
            state.registry.leave(conversation_id, conn).await;
            state
                .typing
                .room_left(&state.registry, &state.redis, conversation_id, user_id)
                .await;
        }

        ClientEvent::Typing {
            conversation_id,
            is_typing,
        } => {
            if !state.registry.in_room(conversation_id, conn).await {
                send_error(state, conn, "not-in-conversation", "join the conversation first")
                    .await;
                return;
            }
            if is_typing {
                state
                    .typing
                    .started(&state.registry, &state.redis, conn, conversation_id, user_id)
                    .await;
            } else {
                state
                    .typing
                    .stopped(&state.registry, &state.redis, conn, conversation_id, user_id)
                    .await;
            }
        }

        ClientEvent::MarkMessagesRead { conversation_id } => {
            match ConversationService::mark_messages_read(&state.db, conversation_id, user_id)
                .await
            {
                Ok(_) => {
                    let event = ServerEvent::MessagesRead {
                        conversation_id,
                        user_id,
                    };
                    events::broadcast_event(&state.registry, &state.redis, conversation_id, &event)
                        .await;
                }
                Err(e) => {
                    tracing::error!(%user_id, %conversation_id, error = %e, "mark read failed");
                    send_error(state, conn, "internal-error", "failed to mark messages read")
                        .await;
                }
            }
        }
    }
}

async fn send_event(state: &AppState, conn: ConnectionId, event: &ServerEvent) {
    if let Ok(payload) = event.to_json() {
        state.registry.send_to(conn, &payload).await;
    }
}

async fn send_error(state: &AppState, conn: ConnectionId, code: &str, message: &str) {
    send_event(
        state,
        conn,
        &ServerEvent::Error {
            code: code.to_string(),
            message: message.to_string(),
        },
    )
    .await;
}

/// Error frame for a connection that is not registered yet.
async fn send_raw_error(sender: &mut SplitSink<WebSocket, Message>, code: &str, message: &str) {
    let event = ServerEvent::Error {
        code: code.to_string(),
        message: message.to_string(),
    };
    if let Ok(payload) = event.to_json() {
        let _ = sender.send(Message::Text(payload)).await;
    }
}
