use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::message::Message;

pub struct MessageService;

impl MessageService {
    /// Persist a message and bump the conversation's activity timestamp.
    /// Membership is checked by the caller; this is pure persistence.
    pub async fn create_message(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, crate::error::AppError> {
        let id = Uuid::new_v4();
        let message = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (id, conversation_id, sender_id, content) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, conversation_id, sender_id, content, read_at, created_at",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(content)
        .fetch_one(db)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(db)
            .await?;

        Ok(message)
    }

    pub async fn get_history(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Message>, crate::error::AppError> {
        let limit = limit.clamp(1, 200);

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, conversation_id, sender_id, content, read_at, created_at
            FROM messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;

        Ok(messages)
    }

    /// Unread messages addressed to this user in one conversation.
    pub async fn unread_count(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, crate::error::AppError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM messages \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_one(db)
        .await?;
        Ok(count)
    }
}
