//! Route registration
//! Builds the router and applies the global middleware stack

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};

use crate::{
    auth::middleware::jwt_auth_middleware,
    config::HttpConfig,
    handlers,
    middleware::{request_tracking_middleware, AppState},
};

/// Versioned prefix of the auth route group
pub const AUTH_PREFIX: &str = "/api/v1/auth";

pub fn create_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::root::index))
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/metrics", get(handlers::health::metrics_export));

    Router::new()
        .merge(public_routes)
        .nest(AUTH_PREFIX, auth_router(&state))
        .fallback(handlers::root::not_found)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.config.http.max_body_bytes))
        .layer(cors_layer(&state.config.http))
        .layer(from_fn(request_tracking_middleware))
        .with_state(state)
}

fn auth_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    let open = Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/login", post(handlers::auth::login))
        .route("/refresh", post(handlers::auth::refresh_token));

    // route_layer keeps unknown paths at 404 instead of 401
    let authenticated = Router::new()
        .route("/me", get(handlers::auth::get_current_user))
        .route("/logout", post(handlers::auth::logout))
        .route("/logout-all", post(handlers::auth::logout_all))
        .route("/password", put(handlers::auth::change_password))
        .route_layer(from_fn_with_state(
            state.jwt_service.clone(),
            jwt_auth_middleware,
        ));

    open.merge(authenticated)
}

/// No configured origins means any origin, otherwise an exact allow-list
pub fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let exposed = [
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("x-trace-id"),
    ];

    if config.allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(exposed);
    }

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers(exposed)
}
