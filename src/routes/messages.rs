use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::guards::User;
use crate::models::message::Message;
use crate::services::{
    conversation_service::ConversationService, message_service::MessageService,
};
use crate::state::AppState;
use crate::websocket::events::{self, ServerEvent};

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

pub async fn send_message(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<Message>, crate::error::AppError> {
    if body.content.trim().is_empty() {
        return Err(crate::error::AppError::BadRequest(
            "message content cannot be empty".into(),
        ));
    }
    if !ConversationService::is_member(&state.db, conversation_id, user.id).await? {
        return Err(crate::error::AppError::Forbidden);
    }

    let message =
        MessageService::create_message(&state.db, conversation_id, user.id, &body.content).await?;

    let event = ServerEvent::NewMessage {
        conversation_id,
        message: message.clone(),
    };
    // Room members see the message; the other members' tabs that are not
    // subscribed to the room still get a push for their unread badges.
    events::broadcast_event(&state.registry, &state.redis, conversation_id, &event).await;
    for member in ConversationService::member_ids(&state.db, conversation_id).await? {
        if member != user.id {
            events::notify_user_except_room_event(
                &state.registry,
                &state.redis,
                member,
                conversation_id,
                &event,
            )
            .await;
        }
    }

    Ok(Json(message))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_message_history(
    State(state): State<AppState>,
    user: User,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Message>>, crate::error::AppError> {
    if !ConversationService::is_member(&state.db, conversation_id, user.id).await? {
        return Err(crate::error::AppError::Forbidden);
    }
    let messages = MessageService::get_history(
        &state.db,
        conversation_id,
        params.limit.unwrap_or(50),
        params.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(messages))
}
