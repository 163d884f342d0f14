//! User domain models

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("username pattern is valid"));

/// User account row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub full_name: Option<String>,
    pub role: String,

    // Account state
    pub status: String, // enabled, disabled, locked

    // Security policy
    pub failed_login_attempts: i32,
    pub last_failed_login_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub password_changed_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn status_kind(&self) -> UserStatus {
        UserStatus::from(self.status.clone())
    }

    pub fn roles(&self) -> Vec<String> {
        vec![self.role.clone()]
    }

    /// Locked with a lock that has not run out yet
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.status_kind() == UserStatus::Locked
            && self.locked_until.map_or(true, |until| until > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Enabled,
    Disabled,
    Locked,
}

impl From<String> for UserStatus {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "enabled" => UserStatus::Enabled,
            "locked" => UserStatus::Locked,
            _ => UserStatus::Disabled,
        }
    }
}

impl From<UserStatus> for String {
    fn from(status: UserStatus) -> Self {
        match status {
            UserStatus::Enabled => "enabled".to_string(),
            UserStatus::Disabled => "disabled".to_string(),
            UserStatus::Locked => "locked".to_string(),
        }
    }
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
    if USERNAME_RE.is_match(username) {
        Ok(())
    } else {
        Err(ValidationError::new("username_format").with_message(
            "username may only contain letters, digits, '_', '.' and '-'".into(),
        ))
    }
}

/// Self-service sign-up
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(
        length(min = 3, max = 32, message = "username must be 3 to 32 characters"),
        custom(function = "validate_username")
    )]
    pub username: String,

    #[validate(
        email(message = "email is not a valid address"),
        length(max = 254, message = "email is too long")
    )]
    pub email: String,

    pub password: String,

    #[validate(length(max = 100, message = "full_name must be at most 100 characters"))]
    pub full_name: Option<String>,
}

impl RegisterRequest {
    /// Trim and lowercase what should not be case or whitespace sensitive
    pub fn normalized(self) -> Self {
        Self {
            username: self.username.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            password: self.password,
            full_name: self
                .full_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// User as returned by the API, without credentials
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub status: String,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            role: user.role,
            status: user.status,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
        }
    }
}
