//! Session storage: hashed refresh tokens and the login audit trail

use crate::{error::AppError, models::session::*};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

pub struct SessionRepository {
    db: PgPool,
}

impl SessionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Storage key of a refresh token: lowercase hex SHA-256
    pub fn hash_token(token: &str) -> String {
        format!("{:x}", Sha256::digest(token.as_bytes()))
    }

    pub async fn insert_session(&self, session: &RefreshToken) -> Result<(), AppError> {
        insert_session_with(&self.db, session).await
    }

    pub async fn find_session_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshToken>, AppError> {
        Ok(
            sqlx::query_as::<_, RefreshToken>(
                "SELECT * FROM refresh_tokens WHERE token_hash = $1",
            )
            .bind(token_hash)
            .fetch_optional(&self.db)
            .await?,
        )
    }

    /// Revoke `previous_id` and store its successor in one transaction.
    ///
    /// Returns `Ok(false)` without storing anything when `previous_id` was
    /// already revoked by a concurrent rotation. A failed insert rolls the
    /// revocation back, so the presented token stays usable.
    pub async fn rotate_session(
        &self,
        previous_id: Uuid,
        successor: &RefreshToken,
    ) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await?;

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = NOW(), replaced_by = $2
            WHERE id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(previous_id)
        .bind(successor.id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if revoked == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_session_with(&mut *tx, successor).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Logout of a single session owned by `user_id`
    pub async fn revoke_session_by_token_hash(
        &self,
        token_hash: &str,
        user_id: Uuid,
    ) -> Result<bool, AppError> {
        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens SET revoked_at = NOW()
            WHERE token_hash = $1 AND user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(user_id)
        .execute(&self.db)
        .await?
        .rows_affected();

        Ok(revoked > 0)
    }

    pub async fn revoke_user_sessions(&self, user_id: Uuid) -> Result<u64, AppError> {
        Ok(sqlx::query(
            "UPDATE refresh_tokens SET revoked_at = NOW() WHERE user_id = $1 AND revoked_at IS NULL",
        )
        .bind(user_id)
        .execute(&self.db)
        .await?
        .rows_affected())
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64, AppError> {
        Ok(sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.db)
            .await?
            .rows_affected())
    }

    pub async fn insert_login_event(&self, event: &LoginEvent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO login_events
                (id, user_id, login, event_type, failure_reason, source_ip, user_agent, occurred_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.login)
        .bind(&event.event_type)
        .bind(&event.failure_reason)
        .bind(&event.source_ip)
        .bind(&event.user_agent)
        .bind(event.occurred_at)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    pub async fn delete_login_events_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(sqlx::query("DELETE FROM login_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?
            .rows_affected())
    }

    /// Failed logins from `source_ip` since `since`
    pub async fn count_failures_from_ip(
        &self,
        source_ip: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM login_events
            WHERE source_ip = $1 AND event_type = $2 AND occurred_at > $3
            "#,
        )
        .bind(source_ip)
        .bind(LoginEventType::Failure.as_str())
        .bind(since)
        .fetch_one(&self.db)
        .await?)
    }
}

async fn insert_session_with<'e>(
    executor: impl PgExecutor<'e>,
    session: &RefreshToken,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO refresh_tokens
            (id, token_hash, user_id, user_agent, ip_address, expires_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(session.id)
    .bind(&session.token_hash)
    .bind(session.user_id)
    .bind(&session.user_agent)
    .bind(&session.ip_address)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(executor)
    .await?;

    Ok(())
}
