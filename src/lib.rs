pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::services::{
    AuthService, AuthStore, EmailProvider, LockoutTracker, OAuthService, PasswordResetService,
    RateLimiter, RatePolicy, TokenCipher,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::auth::login,
        handlers::password::request_reset,
        handlers::password::validate_reset,
        handlers::password::complete_reset,
        handlers::oauth::start,
        handlers::oauth::callback,
        handlers::oauth::status,
        handlers::oauth::unlink,
        health,
    ),
    components(schemas(
        handlers::auth::LoginRequest,
        handlers::password::ResetRequestBody,
        handlers::password::ResetCompleteBody,
        models::SanitizedUser,
        services::ProviderLinkStatus,
    )),
    tags(
        (name = "auth", description = "Password authentication"),
        (name = "oauth", description = "Federated sign-in and account linking"),
        (name = "password-reset", description = "Password reset lifecycle"),
    ),
    info(
        title = "Curio Auth API",
        description = "Authentication and account security service for Curio"
    )
)]
pub struct ApiDoc;

/// Shared handler state. Cheap to clone; everything heavy sits behind Arcs.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub store: Arc<dyn AuthStore>,
    pub auth: AuthService,
    pub reset: PasswordResetService,
    pub oauth: OAuthService,
}

impl AppState {
    /// Wire every service from the configuration and the chosen store and
    /// email implementations. Shared by `main` and the integration tests.
    pub fn build(
        config: AuthConfig,
        store: Arc<dyn AuthStore>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let cipher = match &config.token_encryption_key {
            Some(hex_key) => TokenCipher::new(hex_key)
                .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?,
            None => TokenCipher::passthrough(),
        };

        let rate_limiter = RateLimiter::new(Arc::clone(&store));
        let login_policy = RatePolicy::new(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let reset_policy = RatePolicy::new(
            config.rate_limit.reset_attempts,
            config.rate_limit.reset_window_seconds,
        );

        let lockout = LockoutTracker::new(
            Arc::clone(&store),
            config.lockout.threshold,
            config.lockout.lock_seconds,
        );

        let auth = AuthService::new(
            Arc::clone(&store),
            rate_limiter.clone(),
            lockout,
            login_policy,
            config.session.ttl_seconds,
        );

        let reset = PasswordResetService::new(
            Arc::clone(&store),
            email,
            rate_limiter,
            reset_policy,
            config.reset.base_url.clone(),
            config.reset.token_ttl_seconds,
        );

        let oauth = OAuthService::new(Arc::clone(&store), cipher, config.oauth.clone());

        Ok(Self {
            config: Arc::new(config),
            store,
            auth,
            reset,
            oauth,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/oauth/start", get(handlers::oauth::start))
        .route("/auth/oauth/callback", get(handlers::oauth::callback))
        .route("/auth/oauth/status", get(handlers::oauth::status))
        .route("/auth/oauth/:provider", delete(handlers::oauth::unlink))
        .route("/auth/reset/request", post(handlers::password::request_reset))
        .route("/auth/reset/validate", get(handlers::password::validate_reset))
        .route("/auth/reset/complete", post(handlers::password::complete_reset))
        .route("/health", get(health))
        .route("/.well-known/openapi.json", get(openapi_spec))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &AuthConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Liveness plus a store round trip.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy"),
        (status = 503, description = "Store unreachable"),
    ),
    tag = "health"
)]
pub async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    state
        .store
        .health_check()
        .await
        .map_err(|e| AppError::ServiceUnavailable(e.to_string()))?;

    Ok(Json(json!({
        "status": "ok",
        "service": state.config.service_name,
        "version": state.config.service_version,
    })))
}

async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}
