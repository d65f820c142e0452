use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::models::conversation::{Conversation, ConversationMember};

pub struct ConversationWithMembers {
    pub conversation: Conversation,
    pub members: Vec<ConversationMember>,
}

pub struct ConversationService;

impl ConversationService {
    /// Create a direct conversation between two users. Both become
    /// members in the same transaction.
    pub async fn create_direct_conversation(
        db: &Pool<Postgres>,
        a: Uuid,
        b: Uuid,
    ) -> Result<Uuid, crate::error::AppError> {
        let id = Uuid::new_v4();
        let mut tx = db.begin().await?;

        sqlx::query("INSERT INTO conversations (id, kind, created_by) VALUES ($1, 'direct', $2)")
            .bind(id)
            .bind(a)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO conversation_members (conversation_id, user_id, role) \
             VALUES ($1, $2, 'member'), ($1, $3, 'member') ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(a)
        .bind(b)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    pub async fn is_member(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, crate::error::AppError> {
        let rec = sqlx::query(
            "SELECT 1 FROM conversation_members WHERE conversation_id=$1 AND user_id=$2 LIMIT 1",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(rec.is_some())
    }

    pub async fn member_ids(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
    ) -> Result<Vec<Uuid>, crate::error::AppError> {
        let rows =
            sqlx::query("SELECT user_id FROM conversation_members WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_all(db)
                .await?;
        Ok(rows.into_iter().map(|r| r.get("user_id")).collect())
    }

    /// Get conversation with full member details.
    /// Security: validates that the requesting user is a member before
    /// returning data.
    pub async fn get_conversation_with_members(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        requesting_user_id: Uuid,
    ) -> Result<ConversationWithMembers, crate::error::AppError> {
        if !Self::is_member(db, conversation_id, requesting_user_id).await? {
            return Err(crate::error::AppError::Forbidden);
        }

        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, kind, created_by, created_at, updated_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(db)
        .await?
        .ok_or(crate::error::AppError::NotFound)?;

        let members = sqlx::query_as::<_, ConversationMember>(
            r#"
            SELECT user_id, role, joined_at, last_read_at
            FROM conversation_members
            WHERE conversation_id = $1
            ORDER BY joined_at ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(db)
        .await?;

        Ok(ConversationWithMembers {
            conversation,
            members,
        })
    }

    /// Flip the read flag on the conversation's messages not sent by the
    /// reader, and record the read position on the membership row.
    /// Returns how many messages were flipped.
    pub async fn mark_messages_read(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, crate::error::AppError> {
        if !Self::is_member(db, conversation_id, user_id).await? {
            return Err(crate::error::AppError::Forbidden);
        }

        let result = sqlx::query(
            "UPDATE messages SET read_at = NOW() \
             WHERE conversation_id = $1 AND sender_id <> $2 AND read_at IS NULL",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await?;

        sqlx::query(
            "UPDATE conversation_members SET last_read_at = NOW() \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(db)
        .await?;

        Ok(result.rows_affected())
    }

    /// Most recent read position per member, used by clients to render
    /// delivery status without a realtime event.
    pub async fn last_read_at(
        db: &Pool<Postgres>,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>, crate::error::AppError> {
        let row = sqlx::query(
            "SELECT last_read_at FROM conversation_members \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(db)
        .await?;
        Ok(row.and_then(|r| r.try_get("last_read_at").ok()))
    }
}
