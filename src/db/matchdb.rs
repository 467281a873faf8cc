use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::chatmodel::ChatThread;
use crate::models::matchmodel::*;

/// Store-level error codes surfaced through `sqlx::Error::Protocol` from the
/// transactional paths. The service layer maps these onto its own taxonomy.
pub const ERR_REQUEST_NOT_OPEN: &str = "request_not_open";
pub const ERR_APPLICATION_PROCESSED: &str = "application_already_processed";
pub const ERR_ALREADY_APPLIED: &str = "already_applied";

#[async_trait]
pub trait MatchStoreExt {
    async fn create_request(
        &self,
        client_id: Uuid,
        category_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Result<Request, Error>;

    async fn get_request_by_id(&self, request_id: Uuid) -> Result<Option<Request>, Error>;

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<Request, Error>;

    async fn create_application(
        &self,
        request_id: Uuid,
        specialist_id: Uuid,
        message: String,
    ) -> Result<Application, Error>;

    async fn get_application_by_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Application>, Error>;

    async fn get_request_applications(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Application>, Error>;

    /// The single accepted application for a request, if any.
    async fn get_accepted_application(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Application>, Error>;

    /// Atomically accept an application: flip it to `accepted`, move the
    /// request to `in_progress` and look up or create the chat thread for
    /// (client, specialist, request). All three commit together or not at
    /// all. Re-entering with an already-accepted application returns the
    /// existing thread without further writes.
    async fn accept_application(
        &self,
        application_id: Uuid,
    ) -> Result<(Application, Request, ChatThread), Error>;

    /// Decline a sent application. Declining an already-declined application
    /// is a no-op that returns the row unchanged.
    async fn decline_application(&self, application_id: Uuid) -> Result<Application, Error>;

    /// Placeholder review row created when a request reaches `completed`.
    /// Idempotent; the review system fills it in later.
    async fn create_review_placeholder(
        &self,
        request_id: Uuid,
        client_id: Uuid,
        specialist_id: Uuid,
    ) -> Result<(), Error>;
}

#[async_trait]
impl MatchStoreExt for DBClient {
    async fn create_request(
        &self,
        client_id: Uuid,
        category_id: Uuid,
        title: String,
        description: Option<String>,
    ) -> Result<Request, Error> {
        sqlx::query_as::<_, Request>(
            r#"
            INSERT INTO requests (client_id, category_id, title, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, client_id, category_id, title, description, status,
                      created_at, updated_at
            "#,
        )
        .bind(client_id)
        .bind(category_id)
        .bind(title)
        .bind(description)
        .fetch_one(&self.pool)
        .await
    }

    async fn get_request_by_id(&self, request_id: Uuid) -> Result<Option<Request>, Error> {
        sqlx::query_as::<_, Request>(
            r#"
            SELECT id, client_id, category_id, title, description, status,
                   created_at, updated_at
            FROM requests
            WHERE id = $1
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
    ) -> Result<Request, Error> {
        sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, client_id, category_id, title, description, status,
                      created_at, updated_at
            "#,
        )
        .bind(request_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await
    }

    async fn create_application(
        &self,
        request_id: Uuid,
        specialist_id: Uuid,
        message: String,
    ) -> Result<Application, Error> {
        let mut tx = self.pool.begin().await?;

        // One non-declined application per specialist per request. The
        // partial unique index backs this up against races.
        let existing = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM applications
            WHERE request_id = $1
              AND specialist_id = $2
              AND status != 'declined'::application_status
            "#,
        )
        .bind(request_id)
        .bind(specialist_id)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            return Err(Error::Protocol(ERR_ALREADY_APPLIED.into()));
        }

        let application = sqlx::query_as::<_, Application>(
            r#"
            INSERT INTO applications (request_id, specialist_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, request_id, specialist_id, message, status, created_at
            "#,
        )
        .bind(request_id)
        .bind(specialist_id)
        .bind(message)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(application)
    }

    async fn get_application_by_id(
        &self,
        application_id: Uuid,
    ) -> Result<Option<Application>, Error> {
        sqlx::query_as::<_, Application>(
            r#"
            SELECT id, request_id, specialist_id, message, status, created_at
            FROM applications
            WHERE id = $1
            "#,
        )
        .bind(application_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_request_applications(
        &self,
        request_id: Uuid,
    ) -> Result<Vec<Application>, Error> {
        sqlx::query_as::<_, Application>(
            r#"
            SELECT id, request_id, specialist_id, message, status, created_at
            FROM applications
            WHERE request_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_accepted_application(
        &self,
        request_id: Uuid,
    ) -> Result<Option<Application>, Error> {
        sqlx::query_as::<_, Application>(
            r#"
            SELECT id, request_id, specialist_id, message, status, created_at
            FROM applications
            WHERE request_id = $1
              AND status = 'accepted'::application_status
            "#,
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn accept_application(
        &self,
        application_id: Uuid,
    ) -> Result<(Application, Request, ChatThread), Error> {
        let mut tx = self.pool.begin().await?;

        // Lock the application row; concurrent accepts serialize here.
        let application = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, request_id, specialist_id, message, status, created_at
            FROM applications
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::RowNotFound)?;

        if application.status == ApplicationStatus::Accepted {
            // Idempotent re-entry: the earlier transaction committed, so the
            // request and thread already exist. Return them without writes.
            let request = sqlx::query_as::<_, Request>(
                r#"
                SELECT id, client_id, category_id, title, description, status,
                       created_at, updated_at
                FROM requests
                WHERE id = $1
                "#,
            )
            .bind(application.request_id)
            .fetch_one(&mut *tx)
            .await?;

            let thread = find_or_create_thread_tx(
                &mut tx,
                request.client_id,
                application.specialist_id,
                Some(request.id),
            )
            .await?;

            tx.commit().await?;
            return Ok((application, request, thread));
        }

        if application.status == ApplicationStatus::Declined {
            return Err(Error::Protocol(ERR_APPLICATION_PROCESSED.into()));
        }

        let request = sqlx::query_as::<_, Request>(
            r#"
            SELECT id, client_id, category_id, title, description, status,
                   created_at, updated_at
            FROM requests
            WHERE id = $1 AND status = 'open'::request_status
            FOR UPDATE
            "#,
        )
        .bind(application.request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::Protocol(ERR_REQUEST_NOT_OPEN.into()))?;

        let application = sqlx::query_as::<_, Application>(
            r#"
            UPDATE applications
            SET status = 'accepted'::application_status
            WHERE id = $1
            RETURNING id, request_id, specialist_id, message, status, created_at
            "#,
        )
        .bind(application_id)
        .fetch_one(&mut *tx)
        .await?;

        let request = sqlx::query_as::<_, Request>(
            r#"
            UPDATE requests
            SET status = 'in_progress'::request_status, updated_at = NOW()
            WHERE id = $1
            RETURNING id, client_id, category_id, title, description, status,
                      created_at, updated_at
            "#,
        )
        .bind(request.id)
        .fetch_one(&mut *tx)
        .await?;

        let thread = find_or_create_thread_tx(
            &mut tx,
            request.client_id,
            application.specialist_id,
            Some(request.id),
        )
        .await?;

        tx.commit().await?;
        Ok((application, request, thread))
    }

    async fn decline_application(&self, application_id: Uuid) -> Result<Application, Error> {
        let mut tx = self.pool.begin().await?;

        let application = sqlx::query_as::<_, Application>(
            r#"
            SELECT id, request_id, specialist_id, message, status, created_at
            FROM applications
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(application_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::RowNotFound)?;

        match application.status {
            // Repeated declines are a no-op success.
            ApplicationStatus::Declined => {
                tx.commit().await?;
                Ok(application)
            }
            ApplicationStatus::Accepted => {
                Err(Error::Protocol(ERR_APPLICATION_PROCESSED.into()))
            }
            ApplicationStatus::Sent => {
                let application = sqlx::query_as::<_, Application>(
                    r#"
                    UPDATE applications
                    SET status = 'declined'::application_status
                    WHERE id = $1
                    RETURNING id, request_id, specialist_id, message, status, created_at
                    "#,
                )
                .bind(application_id)
                .fetch_one(&mut *tx)
                .await?;

                tx.commit().await?;
                Ok(application)
            }
        }
    }

    async fn create_review_placeholder(
        &self,
        request_id: Uuid,
        client_id: Uuid,
        specialist_id: Uuid,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO reviews (request_id, client_id, specialist_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(request_id)
        .bind(client_id)
        .bind(specialist_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Lookup-or-create inside an open transaction, so acceptance and thread
/// creation commit atomically. The unique index on
/// (client_id, specialist_id, request_id) keeps this idempotent under races.
pub(crate) async fn find_or_create_thread_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    client_id: Uuid,
    specialist_id: Uuid,
    request_id: Option<Uuid>,
) -> Result<ChatThread, Error> {
    let existing = sqlx::query_as::<_, ChatThread>(
        r#"
        SELECT id, client_id, specialist_id, request_id, last_message_at, created_at
        FROM chat_threads
        WHERE client_id = $1
          AND specialist_id = $2
          AND request_id IS NOT DISTINCT FROM $3
        "#,
    )
    .bind(client_id)
    .bind(specialist_id)
    .bind(request_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(thread) = existing {
        return Ok(thread);
    }

    sqlx::query_as::<_, ChatThread>(
        r#"
        INSERT INTO chat_threads (client_id, specialist_id, request_id)
        VALUES ($1, $2, $3)
        RETURNING id, client_id, specialist_id, request_id, last_message_at, created_at
        "#,
    )
    .bind(client_id)
    .bind(specialist_id)
    .bind(request_id)
    .fetch_one(&mut **tx)
    .await
}
