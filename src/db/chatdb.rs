use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::chatmodel::*;

#[async_trait]
pub trait ChatStoreExt {
    /// Idempotent thread lookup-or-create for a (client, specialist, request)
    /// triple. Used both by acceptance and by clients initiating contact.
    async fn find_or_create_thread(
        &self,
        client_id: Uuid,
        specialist_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<ChatThread, Error>;

    async fn get_thread_by_id(&self, thread_id: Uuid) -> Result<Option<ChatThread>, Error>;

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatThread>, Error>;

    async fn create_message(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        body: String,
        attachment_id: Option<Uuid>,
    ) -> Result<ChatMessage, Error>;

    /// Newest-first page of messages, keyset-paginated: rows strictly older
    /// than `before_id` (by that message's creation time) when given.
    async fn list_messages(
        &self,
        thread_id: Uuid,
        before_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, Error>;

    /// Flip unread messages from the other participant to read. Returns how
    /// many rows changed; the read flag never reverses.
    async fn mark_thread_read(&self, thread_id: Uuid, reader_id: Uuid) -> Result<u64, Error>;

    async fn unread_count_for_thread(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, Error>;

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, Error>;
}

#[async_trait]
impl ChatStoreExt for DBClient {
    async fn find_or_create_thread(
        &self,
        client_id: Uuid,
        specialist_id: Uuid,
        request_id: Option<Uuid>,
    ) -> Result<ChatThread, Error> {
        let mut tx = self.pool.begin().await?;
        let thread = super::matchdb::find_or_create_thread_tx(
            &mut tx,
            client_id,
            specialist_id,
            request_id,
        )
        .await?;
        tx.commit().await?;
        Ok(thread)
    }

    async fn get_thread_by_id(&self, thread_id: Uuid) -> Result<Option<ChatThread>, Error> {
        sqlx::query_as::<_, ChatThread>(
            r#"
            SELECT id, client_id, specialist_id, request_id, last_message_at, created_at
            FROM chat_threads
            WHERE id = $1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_user_threads(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatThread>, Error> {
        sqlx::query_as::<_, ChatThread>(
            r#"
            SELECT id, client_id, specialist_id, request_id, last_message_at, created_at
            FROM chat_threads
            WHERE client_id = $1 OR specialist_id = $1
            ORDER BY last_message_at DESC NULLS LAST, created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn create_message(
        &self,
        thread_id: Uuid,
        sender_id: Uuid,
        body: String,
        attachment_id: Option<Uuid>,
    ) -> Result<ChatMessage, Error> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, ChatMessage>(
            r#"
            INSERT INTO chat_messages (thread_id, sender_id, body, attachment_id)
            VALUES ($1, $2, $3, $4)
            RETURNING id, thread_id, sender_id, body, attachment_id,
                      is_read, read_at, created_at
            "#,
        )
        .bind(thread_id)
        .bind(sender_id)
        .bind(body)
        .bind(attachment_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE chat_threads
            SET last_message_at = $2
            WHERE id = $1
            "#,
        )
        .bind(thread_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn list_messages(
        &self,
        thread_id: Uuid,
        before_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, Error> {
        sqlx::query_as::<_, ChatMessage>(
            r#"
            SELECT id, thread_id, sender_id, body, attachment_id,
                   is_read, read_at, created_at
            FROM chat_messages
            WHERE thread_id = $1
              AND ($2::uuid IS NULL OR created_at < (
                    SELECT created_at FROM chat_messages WHERE id = $2
              ))
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(thread_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_thread_read(&self, thread_id: Uuid, reader_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages
            SET is_read = true, read_at = NOW()
            WHERE thread_id = $1
              AND sender_id != $2
              AND is_read = false
            "#,
        )
        .bind(thread_id)
        .bind(reader_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn unread_count_for_thread(
        &self,
        thread_id: Uuid,
        user_id: Uuid,
    ) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM chat_messages
            WHERE thread_id = $1
              AND sender_id != $2
              AND is_read = false
            "#,
        )
        .bind(thread_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn unread_count(&self, user_id: Uuid) -> Result<i64, Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM chat_messages m
            INNER JOIN chat_threads t ON m.thread_id = t.id
            WHERE (t.client_id = $1 OR t.specialist_id = $1)
              AND m.sender_id != $1
              AND m.is_read = false
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
    }
}
