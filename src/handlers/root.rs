//! Root liveness text and the catch-all fallback

use crate::error::AppError;

/// Body returned by `GET /`
pub const LIVENESS_TEXT: &str = "✅ Auth Service Running";

pub async fn index() -> &'static str {
    LIVENESS_TEXT
}

pub async fn not_found() -> AppError {
    AppError::NotFound
}
