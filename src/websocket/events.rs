//! Server-to-client event vocabulary and fan-out helpers.
//!
//! Every event is one JSON object per text frame with a `type`
//! discriminator and the event fields at the top level:
//!
//! ```json
//! {"type":"user-typing","conversation_id":"...","user_id":"...","is_typing":true}
//! ```
//!
//! Serialization happens here, once per fan-out; handlers never build
//! JSON by hand. The helpers pair the local registry fan-out with a
//! best-effort publish on the Redis backbone so that members connected to
//! other instances see the same event.

use crate::models::message::Message;
use crate::websocket::{pubsub, ConnectionRegistry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake ack: the connection is bound to this user id.
    #[serde(rename = "authenticated")]
    Authenticated { user_id: Uuid },

    /// A message was persisted; room members refresh their view.
    #[serde(rename = "new-message")]
    NewMessage {
        conversation_id: Uuid,
        message: Message,
    },

    /// Typing state changed for a room member.
    #[serde(rename = "user-typing")]
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// The given user has read the conversation up to now.
    #[serde(rename = "messages-read")]
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    /// Targeted push to a user, independent of room membership.
    #[serde(rename = "notification")]
    Notification {
        id: Uuid,
        notification_type: String,
        title: String,
        message: String,
    },

    /// Explicit rejection of a client frame.
    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::NewMessage { .. } => "new-message",
            Self::UserTyping { .. } => "user-typing",
            Self::MessagesRead { .. } => "messages-read",
            Self::Notification { .. } => "notification",
            Self::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Fan an event out to a room: local registry delivery plus a publish on
/// the cross-instance backbone. Publish failures are logged and swallowed
/// (delivery is best-effort by contract).
pub async fn broadcast_event(
    registry: &ConnectionRegistry,
    redis: &redis::Client,
    conversation_id: Uuid,
    event: &ServerEvent,
) {
    let payload = match event.to_json() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
            return;
        }
    };
    crate::metrics::record_fan_out(event.event_type());
    registry.broadcast(conversation_id, &payload).await;
    if let Err(e) = pubsub::publish_to_conversation(redis, conversation_id, &payload).await {
        tracing::warn!(error = %e, %conversation_id, "redis publish failed; local delivery only");
    }
}

/// Same as [`broadcast_event`] but excluding the originating connection
/// (typing echo suppression). The origin exclusion only applies locally;
/// remote instances never host the originating connection.
pub async fn broadcast_event_except(
    registry: &ConnectionRegistry,
    redis: &redis::Client,
    conversation_id: Uuid,
    origin: crate::websocket::ConnectionId,
    event: &ServerEvent,
) {
    let payload = match event.to_json() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
            return;
        }
    };
    crate::metrics::record_fan_out(event.event_type());
    registry
        .broadcast_except(conversation_id, origin, &payload)
        .await;
    if let Err(e) = pubsub::publish_to_conversation(redis, conversation_id, &payload).await {
        tracing::warn!(error = %e, %conversation_id, "redis publish failed; local delivery only");
    }
}

/// Push an event to every connection of a user, on this instance and on
/// the others.
pub async fn notify_user_event(
    registry: &ConnectionRegistry,
    redis: &redis::Client,
    user_id: Uuid,
    event: &ServerEvent,
) {
    let payload = match event.to_json() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
            return;
        }
    };
    crate::metrics::record_fan_out(event.event_type());
    registry.notify_user(user_id, &payload).await;
    if let Err(e) = pubsub::publish_to_user(redis, user_id, None, &payload).await {
        tracing::warn!(error = %e, %user_id, "redis publish failed; local delivery only");
    }
}

/// Push an event to a user's connections that are not subscribed to the
/// given room. Combined with a room broadcast this reaches every
/// interested connection exactly once.
pub async fn notify_user_except_room_event(
    registry: &ConnectionRegistry,
    redis: &redis::Client,
    user_id: Uuid,
    room: Uuid,
    event: &ServerEvent,
) {
    let payload = match event.to_json() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
            return;
        }
    };
    crate::metrics::record_fan_out(event.event_type());
    registry
        .notify_user_except_room(user_id, room, &payload)
        .await;
    if let Err(e) = pubsub::publish_to_user(redis, user_id, Some(room), &payload).await {
        tracing::warn!(error = %e, %user_id, "redis publish failed; local delivery only");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typing_event_serializes_flat() {
        let conversation_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let event = ServerEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: true,
        };

        let parsed: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed["type"], "user-typing");
        assert_eq!(parsed["conversation_id"], conversation_id.to_string());
        assert_eq!(parsed["user_id"], user_id.to_string());
        assert_eq!(parsed["is_typing"], true);
    }

    #[test]
    fn event_type_matches_wire_name() {
        let event = ServerEvent::MessagesRead {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed["type"], event.event_type());
    }

    #[test]
    fn notification_carries_its_category() {
        let event = ServerEvent::Notification {
            id: Uuid::new_v4(),
            notification_type: "connection-request".into(),
            title: "New connection request".into(),
            message: "Ada wants to connect".into(),
        };
        let parsed: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(parsed["type"], "notification");
        assert_eq!(parsed["notification_type"], "connection-request");
        assert_eq!(parsed["title"], "New connection request");
    }
}
