use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::notification::Notification;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    pub notifications: Vec<Notification>,
    pub total: usize,
    pub unread_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNotification {
    pub recipient_id: Uuid,
    pub actor_id: Option<Uuid>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
}

pub struct NotificationService;

impl NotificationService {
    pub async fn create(
        db: &Pool<Postgres>,
        request: CreateNotification,
    ) -> Result<Notification, crate::error::AppError> {
        let notification = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (id, recipient_id, actor_id, notification_type, title, message)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, recipient_id, actor_id, notification_type, title, message,
                      is_read, read_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(request.recipient_id)
        .bind(request.actor_id)
        .bind(request.notification_type)
        .bind(request.title)
        .bind(request.message)
        .fetch_one(db)
        .await?;

        Ok(notification)
    }

    pub async fn list(
        db: &Pool<Postgres>,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<NotificationPage, crate::error::AppError> {
        let limit = limit.clamp(1, 50);

        let notifications = sqlx::query_as::<_, Notification>(
            r#"
            SELECT id, recipient_id, actor_id, notification_type, title, message,
                   is_read, read_at, created_at
            FROM notifications
            WHERE recipient_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE recipient_id = $1")
                .bind(user_id)
                .fetch_one(db)
                .await?;

        let unread_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .fetch_one(db)
        .await?;

        Ok(NotificationPage {
            notifications,
            total: total as usize,
            unread_count: unread_count as usize,
        })
    }

    /// Mark one notification read. Scoped to the recipient so a user
    /// cannot touch someone else's notifications.
    pub async fn mark_read(
        db: &Pool<Postgres>,
        notification_id: Uuid,
        user_id: Uuid,
    ) -> Result<(), crate::error::AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW() \
             WHERE id = $1 AND recipient_id = $2",
        )
        .bind(notification_id)
        .bind(user_id)
        .execute(db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(crate::error::AppError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(
        db: &Pool<Postgres>,
        user_id: Uuid,
    ) -> Result<u64, crate::error::AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW() \
             WHERE recipient_id = $1 AND is_read = FALSE",
        )
        .bind(user_id)
        .execute(db)
        .await?;
        Ok(result.rows_affected())
    }
}
