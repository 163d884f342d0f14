//! User repository

use crate::{
    error::{map_unique_violation, AppError},
    models::user::*,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

pub struct UserRepository {
    db: PgPool,
}

impl UserRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// Look up by username, or by email when the identifier contains '@'
    pub async fn find_by_login(&self, login: &str) -> Result<Option<User>, AppError> {
        let login = login.trim();
        if login.contains('@') {
            self.find_by_email(login).await
        } else {
            self.find_by_username(login).await
        }
    }

    pub async fn exists(&self, username: &str, email: &str) -> Result<(bool, bool), AppError> {
        let (username_taken, email_taken): (bool, bool) = sqlx::query_as(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM users WHERE username = $1),
                EXISTS(SELECT 1 FROM users WHERE LOWER(email) = LOWER($2))
            "#,
        )
        .bind(username)
        .bind(email)
        .fetch_one(&self.db)
        .await?;

        Ok((username_taken, email_taken))
    }

    pub async fn create(&self, req: &RegisterRequest, password_hash: &str) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, username, email, password_hash, full_name)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.username)
        .bind(&req.email)
        .bind(password_hash)
        .bind(&req.full_name)
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_unique_violation(e, "User"))
    }

    /// Also lifts a failed-login lock; a disabled account stays disabled
    pub async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET
                password_hash = $2,
                password_changed_at = NOW(),
                failed_login_attempts = 0,
                status = CASE WHEN status = 'locked' THEN 'enabled' ELSE status END,
                locked_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Returns the failure count after the increment
    pub async fn increment_failed_attempts(&self, id: Uuid) -> Result<i32, AppError> {
        let attempts: i32 = sqlx::query_scalar(
            r#"
            UPDATE users
            SET
                failed_login_attempts = failed_login_attempts + 1,
                last_failed_login_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING failed_login_attempts
            "#,
        )
        .bind(id)
        .fetch_one(&self.db)
        .await?;

        Ok(attempts)
    }

    pub async fn lock_account(&self, id: Uuid, locked_until: DateTime<Utc>) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET
                status = 'locked',
                locked_until = $2,
                updated_at = NOW()
            WHERE id = $1 AND status <> 'disabled'
            "#,
        )
        .bind(id)
        .bind(locked_until)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Clear an expired lock and its failure counter
    pub async fn unlock_account(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE users
            SET
                status = 'enabled',
                locked_until = NULL,
                failed_login_attempts = 0,
                updated_at = NOW()
            WHERE id = $1 AND status = 'locked'
            "#,
        )
        .bind(id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Successful login: reset the failure counter and stamp last_login_at
    pub async fn record_successful_login(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET
                failed_login_attempts = 0,
                last_failed_login_at = NULL,
                last_login_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }
}
