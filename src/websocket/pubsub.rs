//! Redis pub/sub backbone for cross-instance fan-out.
//!
//! Room membership lives in each instance's in-memory registry; a user's
//! connections may be spread across instances. Every fan-out is published
//! on a channel named after its target (`conversation:<id>` or
//! `user:<id>`) wrapped in an envelope tagged with the publishing
//! instance's id. Listeners replay envelopes from *other* instances into
//! their local registry and skip their own, so a locally delivered event
//! is never delivered twice.

use futures_util::StreamExt;
use once_cell::sync::Lazy;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::websocket::ConnectionRegistry;

static INSTANCE_ID: Lazy<Uuid> = Lazy::new(Uuid::new_v4);

#[derive(Debug, Serialize, Deserialize)]
struct FanoutEnvelope {
    origin: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude_room: Option<Uuid>,
    payload: String,
}

fn conversation_channel(id: Uuid) -> String {
    format!("conversation:{id}")
}

fn user_channel(id: Uuid) -> String {
    format!("user:{id}")
}

pub async fn publish_to_conversation(
    client: &Client,
    conversation_id: Uuid,
    payload: &str,
) -> redis::RedisResult<()> {
    let envelope = FanoutEnvelope {
        origin: *INSTANCE_ID,
        exclude_room: None,
        payload: payload.to_string(),
    };
    let raw = serde_json::to_string(&envelope)
        .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "serialize failed")))?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish::<_, _, ()>(conversation_channel(conversation_id), raw)
        .await
}

pub async fn publish_to_user(
    client: &Client,
    user_id: Uuid,
    exclude_room: Option<Uuid>,
    payload: &str,
) -> redis::RedisResult<()> {
    let envelope = FanoutEnvelope {
        origin: *INSTANCE_ID,
        exclude_room,
        payload: payload.to_string(),
    };
    let raw = serde_json::to_string(&envelope)
        .map_err(|_| redis::RedisError::from((redis::ErrorKind::TypeError, "serialize failed")))?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.publish::<_, _, ()>(user_channel(user_id), raw).await
}

/// Subscribe to both channel families and replay remote envelopes into
/// the local registry. Runs until the Redis connection drops; the caller
/// owns restart policy.
pub async fn start_psub_listener(
    client: Client,
    registry: ConnectionRegistry,
) -> redis::RedisResult<()> {
    // PubSub requires a dedicated connection, not multiplexed.
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe("conversation:*").await?;
    pubsub.psubscribe("user:*").await?;

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel: String = msg.get_channel_name().into();
        let raw: String = msg.get_payload()?;

        let Ok(envelope) = serde_json::from_str::<FanoutEnvelope>(&raw) else {
            tracing::warn!(%channel, "dropping malformed fan-out envelope");
            continue;
        };
        if envelope.origin == *INSTANCE_ID {
            continue;
        }

        if let Some(rest) = channel.strip_prefix("conversation:") {
            if let Ok(conversation_id) = Uuid::parse_str(rest) {
                registry.broadcast(conversation_id, &envelope.payload).await;
            }
        } else if let Some(rest) = channel.strip_prefix("user:") {
            if let Ok(user_id) = Uuid::parse_str(rest) {
                match envelope.exclude_room {
                    Some(room) => {
                        registry
                            .notify_user_except_room(user_id, room, &envelope.payload)
                            .await
                    }
                    None => registry.notify_user(user_id, &envelope.payload).await,
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips() {
        let envelope = FanoutEnvelope {
            origin: Uuid::new_v4(),
            exclude_room: Some(Uuid::new_v4()),
            payload: r#"{"type":"messages-read"}"#.into(),
        };
        let raw = serde_json::to_string(&envelope).unwrap();
        let parsed: FanoutEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.origin, envelope.origin);
        assert_eq!(parsed.exclude_room, envelope.exclude_room);
        assert_eq!(parsed.payload, envelope.payload);
    }

    #[test]
    fn channel_names_embed_target_id() {
        let id = Uuid::new_v4();
        assert_eq!(conversation_channel(id), format!("conversation:{id}"));
        assert_eq!(user_channel(id), format!("user:{id}"));
    }
}
