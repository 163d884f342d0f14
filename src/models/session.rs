//! Sessions (stored refresh tokens) and login audit events

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RefreshToken {
    pub id: Uuid,
    /// SHA-256 of the token, the raw value is never persisted
    #[serde(skip_serializing)]
    pub token_hash: String,
    pub user_id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// Successor issued when this token was rotated
    pub replaced_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl RefreshToken {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginEventType {
    Success,
    Failure,
}

impl LoginEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginEventType::Success => "login_success",
            LoginEventType::Failure => "login_failure",
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LoginEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    /// Identifier as submitted by the client
    pub login: String,
    pub event_type: String,
    pub failure_reason: Option<String>,
    pub source_ip: String,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
