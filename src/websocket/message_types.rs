use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Client-to-server frames. One JSON object per text frame, discriminated
/// by `type`. The user identity is never taken from these payloads; it is
/// bound to the connection at authentication time.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "join-conversation")]
    JoinConversation { conversation_id: Uuid },

    #[serde(rename = "leave-conversation")]
    LeaveConversation { conversation_id: Uuid },

    #[serde(rename = "typing")]
    Typing {
        conversation_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "mark-messages-read")]
    MarkMessagesRead { conversation_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_join_frame() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"join-conversation","conversation_id":"{id}"}}"#);
        match serde_json::from_str::<ClientEvent>(&raw).unwrap() {
            ClientEvent::JoinConversation { conversation_id } => {
                assert_eq!(conversation_id, id)
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parses_typing_frame() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"type":"typing","conversation_id":"{id}","is_typing":false}}"#);
        match serde_json::from_str::<ClientEvent>(&raw).unwrap() {
            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                assert_eq!(conversation_id, id);
                assert!(!is_typing);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_event_type() {
        let raw = r#"{"type":"self-destruct"}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }
}
