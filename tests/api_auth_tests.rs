//! Auth API flows against a real PostgreSQL
//!
//! Run with `TEST_DATABASE_URL=... cargo test -- --ignored`.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::json;
use serial_test::serial;
use tower::ServiceExt;

mod common;
use auth_service::repository::SessionRepository;
use common::{
    authed_json_request, body_json, create_db_app, create_db_app_with_pool, json_request,
};

const PASSWORD: &str = "TestPass123";

async fn register(app: &Router, username: &str, email: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "username": username,
                "email": email,
                "password": PASSWORD,
                "full_name": "Test User"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

async fn login(app: &Router, login: &str, password: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/login",
            json!({ "login": login, "password": password }),
        ))
        .await
        .unwrap();

    let status = response.status();
    (status, body_json(response).await)
}

async fn login_via_proxy(app: &Router, login: &str, forwarded_for: &str) -> StatusCode {
    let mut request = json_request(
        "POST",
        "/api/v1/auth/login",
        json!({ "login": login, "password": "WrongPass123" }),
    );
    request
        .headers_mut()
        .insert("x-forwarded-for", forwarded_for.parse().unwrap());

    app.clone().oneshot(request).await.unwrap().status()
}

async fn lock_out(app: &Router, login_name: &str) {
    for _ in 0..2 {
        let (status, _) = login(app, login_name, "WrongPass123").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = login(app, login_name, "WrongPass123").await;
    assert_eq!(status, StatusCode::LOCKED);
}

async fn refresh(app: &Router, refresh_token: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();

    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_register_issues_tokens_without_password_hash() {
    let app = create_db_app().await;

    let json = register(&app, "alice", "Alice@Example.com").await;

    assert!(json["access_token"].is_string());
    assert!(json["refresh_token"].is_string());
    assert_eq!(json["token_type"], "Bearer");
    assert_eq!(json["user"]["username"], "alice");
    assert_eq!(json["user"]["email"], "alice@example.com");
    assert_eq!(json["user"]["role"], "user");
    assert!(json["user"].get("password_hash").is_none());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_register_duplicate_is_conflict() {
    let app = create_db_app().await;
    register(&app, "alice", "alice@example.com").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "username": "alice",
                "email": "other@example.com",
                "password": PASSWORD
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/auth/register",
            json!({
                "username": "alice2",
                "email": "ALICE@example.com",
                "password": PASSWORD
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_login_by_username_and_email() {
    let app = create_db_app().await;
    register(&app, "alice", "alice@example.com").await;

    let (status, json) = login(&app, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["user"]["username"], "alice");
    assert!(json["user"]["last_login_at"].is_string());

    let (status, _) = login(&app, "Alice@Example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_login_wrong_password_and_unknown_user() {
    let app = create_db_app().await;
    register(&app, "alice", "alice@example.com").await;

    let (status, json) = login(&app, "alice", "WrongPass123").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"]["code"], 401);

    let (status, _) = login(&app, "nobody", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_repeated_failures_lock_account() {
    let app = create_db_app().await;
    register(&app, "alice", "alice@example.com").await;

    // max_login_attempts is 3 in the test config
    for _ in 0..2 {
        let (status, _) = login(&app, "alice", "WrongPass123").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let (status, _) = login(&app, "alice", "WrongPass123").await;
    assert_eq!(status, StatusCode::LOCKED);

    // The correct password does not get through while locked
    let (status, _) = login(&app, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::LOCKED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_me_returns_current_user() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let access_token = registered["access_token"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], registered["user"]["id"]);
    assert_eq!(json["full_name"], "Test User");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_refresh_token_cannot_authenticate_requests() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let refresh_token = registered["refresh_token"].as_str().unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", refresh_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_refresh_rotates_and_detects_reuse() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let first = registered["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = refresh(&app, &first).await;
    assert_eq!(status, StatusCode::OK);
    let second = rotated["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    // Presenting the rotated-out token revokes every session
    let (status, _) = refresh(&app, &first).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = refresh(&app, &second).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_logout_revokes_refresh_token() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let access_token = registered["access_token"].as_str().unwrap();
    let refresh_token = registered["refresh_token"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "POST",
            "/api/v1/auth/logout",
            access_token,
            json!({ "refresh_token": refresh_token }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = refresh(&app, refresh_token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_logout_all_revokes_every_session() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let (_, second) = login(&app, "alice", PASSWORD).await;
    let access_token = second["access_token"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "POST",
            "/api/v1/auth/logout-all",
            access_token,
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["revoked_sessions"], 2);

    let (status, _) = refresh(&app, registered["refresh_token"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_change_password() {
    let app = create_db_app().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let access_token = registered["access_token"].as_str().unwrap();

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PUT",
            "/api/v1/auth/password",
            access_token,
            json!({ "current_password": "WrongPass123", "new_password": "NewPass456" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PUT",
            "/api/v1/auth/password",
            access_token,
            json!({ "current_password": PASSWORD, "new_password": "NewPass456" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = login(&app, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = login(&app, "alice", "NewPass456").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = refresh(&app, registered["refresh_token"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_password_change_lifts_lockout() {
    let app = create_db_app().await;
    let registered = register(&app, "bob", "bob@example.com").await;
    let access_token = registered["access_token"].as_str().unwrap();

    lock_out(&app, "bob").await;

    let response = app
        .clone()
        .oneshot(authed_json_request(
            "PUT",
            "/api/v1/auth/password",
            access_token,
            json!({ "current_password": PASSWORD, "new_password": "NewPass456" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = login(&app, "bob", "NewPass456").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_expired_lock_is_cleared_on_next_login() {
    let (app, pool) = create_db_app_with_pool().await;
    register(&app, "alice", "alice@example.com").await;
    lock_out(&app, "alice").await;

    sqlx::query("UPDATE users SET locked_until = NOW() - INTERVAL '1 minute' WHERE username = 'alice'")
        .execute(&pool)
        .await
        .unwrap();

    let (status, _) = login(&app, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);

    let (state, attempts): (String, i32) = sqlx::query_as(
        "SELECT status, failed_login_attempts FROM users WHERE username = 'alice'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(state, "enabled");
    assert_eq!(attempts, 0);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_disabled_account_is_forbidden_only_with_correct_password() {
    let (app, pool) = create_db_app_with_pool().await;
    register(&app, "alice", "alice@example.com").await;

    sqlx::query("UPDATE users SET status = 'disabled' WHERE username = 'alice'")
        .execute(&pool)
        .await
        .unwrap();

    // Wrong passwords look like any other failure and never turn into a lock
    for _ in 0..4 {
        let (status, _) = login(&app, "alice", "WrongPass123").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, json) = login(&app, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"]["code"], 403);

    let state: String = sqlx::query_scalar("SELECT status FROM users WHERE username = 'alice'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(state, "disabled");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_login_failures_throttled_per_proxy_reported_ip() {
    let app = create_db_app().await;

    // The client controls the leading hops; only the proxy-appended one counts
    for n in 0..10 {
        let forwarded_for = format!("203.0.113.{}, 198.51.100.7", n);
        assert_eq!(
            login_via_proxy(&app, "nobody", &forwarded_for).await,
            StatusCode::UNAUTHORIZED
        );
    }

    assert_eq!(
        login_via_proxy(&app, "nobody", "203.0.113.99, 198.51.100.7").await,
        StatusCode::TOO_MANY_REQUESTS
    );
    assert_eq!(
        login_via_proxy(&app, "nobody", "198.51.100.8").await,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
#[serial]
async fn test_rotated_session_points_at_its_successor() {
    let (app, pool) = create_db_app_with_pool().await;
    let registered = register(&app, "alice", "alice@example.com").await;
    let first = registered["refresh_token"].as_str().unwrap().to_string();

    let (status, rotated) = refresh(&app, &first).await;
    assert_eq!(status, StatusCode::OK);
    let second = rotated["refresh_token"].as_str().unwrap();

    let (revoked_at, replaced_by): (Option<chrono::DateTime<chrono::Utc>>, Option<uuid::Uuid>) =
        sqlx::query_as("SELECT revoked_at, replaced_by FROM refresh_tokens WHERE token_hash = $1")
            .bind(SessionRepository::hash_token(&first))
            .fetch_one(&pool)
            .await
            .unwrap();
    let (successor_id, successor_replaced_by): (uuid::Uuid, Option<uuid::Uuid>) =
        sqlx::query_as("SELECT id, replaced_by FROM refresh_tokens WHERE token_hash = $1")
            .bind(SessionRepository::hash_token(second))
            .fetch_one(&pool)
            .await
            .unwrap();

    assert!(revoked_at.is_some());
    assert_eq!(replaced_by, Some(successor_id));
    assert_eq!(successor_replaced_by, None);
}
