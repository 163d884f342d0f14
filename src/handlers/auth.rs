//! Authentication HTTP handlers, mounted under /api/v1/auth

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::{AppState, ClientInfo},
    models::{auth::*, user::*},
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

pub async fn register(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.auth_service.register(req, &client).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = state.auth_service.login(req, &client).await?;

    Ok(Json(response))
}

pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    client: ClientInfo,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    let token_pair = state.auth_service.refresh_token(req, &client).await?;

    Ok(Json(token_pair))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .auth_service
        .logout(&req.refresh_token, auth_context.user_id)
        .await?;

    Ok(Json(json!({ "message": "Logged out" })))
}

pub async fn logout_all(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state.auth_service.logout_all(auth_context.user_id).await?;

    Ok(Json(json!({
        "message": "Logged out from all sessions",
        "revoked_sessions": revoked
    })))
}

pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth_service.current_user(auth_context.user_id).await?;

    Ok(Json(user))
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let revoked = state
        .auth_service
        .change_password(auth_context.user_id, req)
        .await?;

    Ok(Json(json!({
        "message": "Password changed, please log in again",
        "revoked_sessions": revoked
    })))
}
