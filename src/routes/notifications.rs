use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::guards::User;
use crate::models::notification::Notification;
use crate::services::notification_service::{
    CreateNotification, NotificationPage, NotificationService,
};
use crate::state::AppState;
use crate::websocket::events::{self, ServerEvent};

#[derive(Deserialize)]
pub struct CreateNotificationRequest {
    pub recipient_id: Uuid,
    pub notification_type: String,
    pub title: String,
    pub message: String,
}

/// Persist a notification and push it to every connection of the
/// recipient, joined rooms or not.
pub async fn create_notification(
    State(state): State<AppState>,
    user: User,
    Json(body): Json<CreateNotificationRequest>,
) -> Result<Json<Notification>, crate::error::AppError> {
    if body.title.trim().is_empty() || body.message.trim().is_empty() {
        return Err(crate::error::AppError::BadRequest(
            "title and message are required".into(),
        ));
    }

    let notification = NotificationService::create(
        &state.db,
        CreateNotification {
            recipient_id: body.recipient_id,
            actor_id: Some(user.id),
            notification_type: body.notification_type,
            title: body.title,
            message: body.message,
        },
    )
    .await?;

    let event = ServerEvent::Notification {
        id: notification.id,
        notification_type: notification.notification_type.clone(),
        title: notification.title.clone(),
        message: notification.message.clone(),
    };
    events::notify_user_event(&state.registry, &state.redis, notification.recipient_id, &event)
        .await;

    Ok(Json(notification))
}

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn get_notifications(
    State(state): State<AppState>,
    user: User,
    Query(params): Query<ListParams>,
) -> Result<Json<NotificationPage>, crate::error::AppError> {
    let page = NotificationService::list(
        &state.db,
        user.id,
        params.limit.unwrap_or(20),
        params.offset.unwrap_or(0),
    )
    .await?;
    Ok(Json(page))
}

pub async fn mark_notification_read(
    State(state): State<AppState>,
    user: User,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, crate::error::AppError> {
    NotificationService::mark_read(&state.db, id, user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct MarkAllReadResponse {
    pub updated: u64,
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: User,
) -> Result<Json<MarkAllReadResponse>, crate::error::AppError> {
    let updated = NotificationService::mark_all_read(&state.db, user.id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}
