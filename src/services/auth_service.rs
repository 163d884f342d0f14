//! Authentication service: registration, login, token refresh, logout and password changes

use crate::{
    auth::{jwt::JwtService, password::PasswordHasher, TokenPair},
    config::AppConfig,
    error::AppError,
    middleware::ClientInfo,
    models::{auth::*, session::*, user::*},
    repository::{session_repo::SessionRepository, user_repo::UserRepository},
};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Failed logins from one address inside the window before it is throttled
const IP_FAILURE_LIMIT: i64 = 10;
const IP_FAILURE_WINDOW_SECS: i64 = 300;

pub struct AuthService {
    db: PgPool,
    jwt_service: Arc<JwtService>,
    config: Arc<AppConfig>,
}

impl AuthService {
    pub fn new(db: PgPool, jwt_service: Arc<JwtService>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            jwt_service,
            config,
        }
    }

    pub async fn register(
        &self,
        req: RegisterRequest,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        let req = req.normalized();
        req.validate()?;
        PasswordHasher::validate_password_policy(&req.password, &self.config.security)?;

        let user_repo = UserRepository::new(self.db.clone());

        let (username_taken, email_taken) = user_repo.exists(&req.username, &req.email).await?;
        if username_taken {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }
        if email_taken {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }

        let password_hash = PasswordHasher::hash_blocking(req.password.clone()).await?;
        let user = user_repo.create(&req, &password_hash).await?;

        tracing::info!(user_id = %user.id, username = %user.username, "User registered");

        let tokens = self.issue_session(&user, client).await?;
        Ok(auth_response(tokens, user))
    }

    /// Checks run in order: IP throttle, running lock, password, disabled flag.
    /// Unknown accounts and wrong passwords both answer 401 after one Argon2 verification.
    pub async fn login(
        &self,
        req: LoginRequest,
        client: &ClientInfo,
    ) -> Result<AuthResponse, AppError> {
        self.check_login_rate_limit(&client.ip).await?;

        let user_repo = UserRepository::new(self.db.clone());
        let now = Utc::now();

        let user = match user_repo.find_by_login(&req.login).await? {
            Some(user) => user,
            None => {
                PasswordHasher::verify_dummy_blocking(req.password).await;
                self.record_login_event(
                    None,
                    &req.login,
                    LoginEventType::Failure,
                    Some("unknown_user"),
                    client,
                )
                .await;
                return Err(AppError::Unauthorized);
            }
        };

        if user.is_locked_at(now) {
            self.record_login_event(
                Some(user.id),
                &req.login,
                LoginEventType::Failure,
                Some("account_locked"),
                client,
            )
            .await;
            return Err(AppError::AccountLocked);
        }

        let mut status = user.status_kind();
        if status == UserStatus::Locked {
            tracing::info!(user_id = %user.id, "Lock expired, unlocking account");
            user_repo.unlock_account(user.id).await?;
            status = UserStatus::Enabled;
        }

        if let Err(e) =
            PasswordHasher::verify_blocking(req.password, user.password_hash.clone()).await
        {
            if matches!(e, AppError::Unauthorized) {
                self.record_login_event(
                    Some(user.id),
                    &req.login,
                    LoginEventType::Failure,
                    Some("invalid_password"),
                    client,
                )
                .await;

                if status == UserStatus::Enabled {
                    self.count_failed_attempt(&user_repo, &user).await?;
                }
            }
            return Err(e);
        }

        if status == UserStatus::Disabled {
            self.record_login_event(
                Some(user.id),
                &req.login,
                LoginEventType::Failure,
                Some("account_disabled"),
                client,
            )
            .await;
            return Err(AppError::Forbidden("Account is disabled".to_string()));
        }

        let user = user_repo
            .record_successful_login(user.id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        let tokens = self.issue_session(&user, client).await?;

        self.record_login_event(
            Some(user.id),
            &req.login,
            LoginEventType::Success,
            None,
            client,
        )
        .await;
        tracing::info!(user_id = %user.id, "User logged in");

        Ok(auth_response(tokens, user))
    }

    /// Rotate a refresh token: the presented one is revoked and a new pair issued
    pub async fn refresh_token(
        &self,
        req: RefreshTokenRequest,
        client: &ClientInfo,
    ) -> Result<TokenPair, AppError> {
        let claims = self.jwt_service.validate_refresh_token(&req.refresh_token)?;

        let sessions = SessionRepository::new(self.db.clone());
        let token_hash = SessionRepository::hash_token(&req.refresh_token);
        let record = sessions
            .find_session_by_token_hash(&token_hash)
            .await?
            .ok_or(AppError::Unauthorized)?;

        if record.user_id.to_string() != claims.sub {
            return Err(AppError::Unauthorized);
        }

        if record.revoked_at.is_some() {
            // A rotated token came back: treat the whole session family as stolen.
            let revoked = sessions.revoke_user_sessions(record.user_id).await?;
            tracing::warn!(
                user_id = %record.user_id,
                token_id = %record.id,
                revoked,
                "Revoked refresh token reused, all sessions revoked"
            );
            return Err(AppError::Unauthorized);
        }

        if !record.is_active_at(Utc::now()) {
            return Err(AppError::Unauthorized);
        }

        let user = UserRepository::new(self.db.clone())
            .find_by_id(&record.user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        self.check_account_status(&user)?;

        let (tokens, successor) = self.new_session(&user, client)?;

        // False means another request already rotated this token
        if !sessions.rotate_session(record.id, &successor).await? {
            return Err(AppError::Unauthorized);
        }

        Ok(tokens)
    }

    pub async fn logout(&self, refresh_token: &str, user_id: Uuid) -> Result<bool, AppError> {
        let token_hash = SessionRepository::hash_token(refresh_token);

        let revoked = SessionRepository::new(self.db.clone())
            .revoke_session_by_token_hash(&token_hash, user_id)
            .await?;

        tracing::info!(%user_id, revoked, "User logged out");
        Ok(revoked)
    }

    pub async fn logout_all(&self, user_id: Uuid) -> Result<u64, AppError> {
        let revoked = SessionRepository::new(self.db.clone())
            .revoke_user_sessions(user_id)
            .await?;

        tracing::info!(%user_id, revoked, "User logged out from all sessions");
        Ok(revoked)
    }

    pub async fn current_user(&self, user_id: Uuid) -> Result<UserResponse, AppError> {
        let user_repo = UserRepository::new(self.db.clone());
        let user = user_repo.find_by_id(&user_id).await?.ok_or(AppError::NotFound)?;

        Ok(UserResponse::from(user))
    }

    /// Returns the number of sessions revoked by the change
    pub async fn change_password(
        &self,
        user_id: Uuid,
        req: ChangePasswordRequest,
    ) -> Result<u64, AppError> {
        let user_repo = UserRepository::new(self.db.clone());
        let user = user_repo.find_by_id(&user_id).await?.ok_or(AppError::NotFound)?;

        PasswordHasher::verify_blocking(req.current_password.clone(), user.password_hash.clone())
            .await?;

        if req.current_password == req.new_password {
            return Err(AppError::Validation(
                "New password must differ from the current password".to_string(),
            ));
        }
        PasswordHasher::validate_password_policy(&req.new_password, &self.config.security)?;

        let password_hash = PasswordHasher::hash_blocking(req.new_password).await?;
        if !user_repo.update_password(user_id, &password_hash).await? {
            return Err(AppError::NotFound);
        }

        let revoked = SessionRepository::new(self.db.clone())
            .revoke_user_sessions(user_id)
            .await?;

        tracing::info!(%user_id, revoked, "Password changed");
        Ok(revoked)
    }

    pub async fn purge_expired_tokens(&self) -> Result<u64, AppError> {
        SessionRepository::new(self.db.clone())
            .delete_expired_sessions()
            .await
    }

    /// Drop login events older than the configured retention
    pub async fn purge_old_login_events(&self) -> Result<u64, AppError> {
        let cutoff =
            Utc::now() - Duration::seconds(self.config.http.login_event_retention_secs as i64);

        SessionRepository::new(self.db.clone())
            .delete_login_events_before(cutoff)
            .await
    }

    /// Mint a token pair and the session row for its refresh token
    fn new_session(
        &self,
        user: &User,
        client: &ClientInfo,
    ) -> Result<(TokenPair, RefreshToken), AppError> {
        let tokens = self
            .jwt_service
            .generate_token_pair(&user.id, &user.username, user.roles())?;

        let now = Utc::now();
        let session = RefreshToken {
            id: Uuid::new_v4(),
            token_hash: SessionRepository::hash_token(&tokens.refresh_token),
            user_id: user.id,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip.clone(),
            expires_at: now + Duration::seconds(self.jwt_service.refresh_token_exp_secs() as i64),
            revoked_at: None,
            replaced_by: None,
            created_at: now,
        };

        Ok((tokens, session))
    }

    async fn issue_session(&self, user: &User, client: &ClientInfo) -> Result<TokenPair, AppError> {
        let (tokens, session) = self.new_session(user, client)?;

        SessionRepository::new(self.db.clone())
            .insert_session(&session)
            .await?;

        Ok(tokens)
    }

    /// Count a wrong password; locks the account once the limit is reached
    async fn count_failed_attempt(
        &self,
        user_repo: &UserRepository,
        user: &User,
    ) -> Result<(), AppError> {
        let attempts = user_repo.increment_failed_attempts(user.id).await?;
        if (attempts.max(0) as u32) < self.config.security.max_login_attempts {
            return Ok(());
        }

        let locked_until =
            Utc::now() + Duration::seconds(self.config.security.login_lockout_duration_secs as i64);
        user_repo.lock_account(user.id, locked_until).await?;
        tracing::warn!(
            user_id = %user.id,
            attempts,
            %locked_until,
            "Too many failed logins, account locked"
        );

        Err(AppError::AccountLocked)
    }

    fn check_account_status(&self, user: &User) -> Result<(), AppError> {
        match user.status_kind() {
            UserStatus::Enabled => Ok(()),
            UserStatus::Disabled => Err(AppError::Forbidden("Account is disabled".to_string())),
            UserStatus::Locked if user.is_locked_at(Utc::now()) => Err(AppError::AccountLocked),
            UserStatus::Locked => Ok(()),
        }
    }

    async fn check_login_rate_limit(&self, client_ip: &str) -> Result<(), AppError> {
        let since = Utc::now() - Duration::seconds(IP_FAILURE_WINDOW_SECS);
        let recent_failures = SessionRepository::new(self.db.clone())
            .count_failures_from_ip(client_ip, since)
            .await?;

        if recent_failures >= IP_FAILURE_LIMIT {
            tracing::warn!(%client_ip, recent_failures, "Rate limit exceeded for login");
            return Err(AppError::RateLimitExceeded);
        }

        Ok(())
    }

    async fn record_login_event(
        &self,
        user_id: Option<Uuid>,
        login: &str,
        event_type: LoginEventType,
        failure_reason: Option<&str>,
        client: &ClientInfo,
    ) {
        let event = LoginEvent {
            id: Uuid::new_v4(),
            user_id,
            login: login.to_string(),
            event_type: event_type.as_str().to_string(),
            failure_reason: failure_reason.map(|s| s.to_string()),
            source_ip: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            occurred_at: Utc::now(),
        };

        // Audit failures must not break the login flow
        if let Err(e) = SessionRepository::new(self.db.clone())
            .insert_login_event(&event)
            .await
        {
            tracing::warn!(error = %e, "Failed to record login event");
        }
    }
}

fn auth_response(tokens: TokenPair, user: User) -> AuthResponse {
    AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_type: tokens.token_type,
        expires_in: tokens.expires_in,
        user: UserResponse::from(user),
    }
}
