use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::guards::User;
use crate::models::conversation::ConversationMember;
use crate::services::{
    conversation_service::ConversationService, message_service::MessageService,
};
use crate::state::AppState;
use crate::websocket::events::{self, ServerEvent};

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub peer_id: Uuid,
}

#[derive(Serialize)]
pub struct CreateConversationResponse {
    pub id: Uuid,
}

pub async fn create_conversation(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateConversationRequest>,
) -> Result<Json<CreateConversationResponse>, crate::error::AppError> {
    if body.peer_id == user.id {
        return Err(crate::error::AppError::BadRequest(
            "cannot start a conversation with yourself".into(),
        ));
    }
    let id =
        ConversationService::create_direct_conversation(&state.db, user.id, body.peer_id).await?;
    Ok(Json(CreateConversationResponse { id }))
}

#[derive(Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub kind: String,
    pub members: Vec<ConversationMember>,
    pub unread_count: i64,
}

pub async fn get_conversation(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, crate::error::AppError> {
    let details = ConversationService::get_conversation_with_members(&state.db, id, user.id).await?;
    let unread_count = MessageService::unread_count(&state.db, id, user.id).await?;
    Ok(Json(ConversationResponse {
        id: details.conversation.id,
        kind: details.conversation.kind,
        members: details.members,
        unread_count,
    }))
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub updated: u64,
}

/// REST twin of the `mark-messages-read` WebSocket frame: flip the read
/// flags, then let the room know so the sender's view updates.
pub async fn mark_as_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<Json<MarkReadResponse>, crate::error::AppError> {
    let updated = ConversationService::mark_messages_read(&state.db, id, user.id).await?;
    let event = ServerEvent::MessagesRead {
        conversation_id: id,
        user_id: user.id,
    };
    events::broadcast_event(&state.registry, &state.redis, id, &event).await;
    Ok(Json(MarkReadResponse { updated }))
}
