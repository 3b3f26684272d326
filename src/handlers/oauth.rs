//! Federated sign-in endpoints.
//!
//! The callback never surfaces provider failures to the browser beyond a
//! generic redirect; details go to the logs. The CSRF state lives in the
//! durable session row and is consumed on every callback, matching or not.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::handlers::{current_user, session_cookie, SESSION_COOKIE};
use crate::models::Session;
use crate::services::ServiceError;
use crate::utils::random_token;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Begin the authorization-code flow.
///
/// The state nonce is saved into the session row before the redirect is
/// returned, so a callback can never arrive ahead of the persisted state.
#[utoipa::path(
    get,
    path = "/auth/oauth/start",
    responses(
        (status = 303, description = "Redirect to the provider"),
    ),
    tag = "oauth"
)]
pub async fn start(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let nonce = random_token();
    let authorize_url = state.oauth.authorize_url(&nonce).map_err(AppError::from)?;

    let mut session = match existing_session(&state, &jar).await? {
        Some(session) => session,
        None => Session::new(random_token(), state.config.session.ttl_seconds),
    };
    session.oauth_state = Some(nonce);

    state
        .store
        .save_session(&session)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    let jar = jar.add(session_cookie(&state, &session));
    Ok((jar, Redirect::to(&authorize_url)))
}

/// Provider callback: verify state, exchange the code, resolve the account,
/// open a session.
#[utoipa::path(
    get,
    path = "/auth/oauth/callback",
    responses(
        (status = 303, description = "Redirect to the application"),
    ),
    tag = "oauth"
)]
pub async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Result<impl IntoResponse, AppError> {
    let provider = state.oauth.provider().map_err(AppError::from)?;
    let failure = Redirect::to(&provider.failure_redirect);
    let success = Redirect::to(&provider.success_redirect);

    let Some(mut session) = existing_session(&state, &jar).await? else {
        tracing::warn!("OAuth callback without a session");
        return Ok((jar, failure));
    };

    // Consume the stored state no matter how this callback ends; a nonce is
    // good for exactly one attempt.
    let expected_state = session.oauth_state.take();
    state
        .store
        .save_session(&session)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    if let Some(error) = query.error {
        tracing::warn!(error = %error, "Provider returned an error on callback");
        return Ok((jar, failure));
    }

    let (Some(code), Some(returned_state)) = (query.code, query.state) else {
        tracing::warn!("OAuth callback missing code or state");
        return Ok((jar, failure));
    };

    if expected_state.as_deref() != Some(returned_state.as_str()) {
        tracing::warn!("OAuth state mismatch, rejecting callback");
        return Ok((jar, failure));
    }

    let result: Result<_, ServiceError> = async {
        let tokens = state.oauth.exchange_code(&code).await?;
        let profile = state.oauth.fetch_profile(&tokens.access_token).await?;
        let (user, created) = state.oauth.resolve_user(&profile, &tokens).await?;
        let session = state.auth.open_session(&user).await?;
        Ok((user, session, created))
    }
    .await;

    match result {
        Ok((user, session, created)) => {
            tracing::info!(user_id = %user.user_id, created = created, "Federated sign-in completed");
            let jar = jar.add(session_cookie(&state, &session));
            Ok((jar, success))
        }
        Err(e) => {
            tracing::error!(error = %e, "Federated sign-in failed");
            Ok((jar, failure))
        }
    }
}

/// Link status for the signed-in user.
#[utoipa::path(
    get,
    path = "/auth/oauth/status",
    responses(
        (status = 200, description = "Link status per provider"),
        (status = 401, description = "Not signed in"),
    ),
    tag = "oauth"
)]
pub async fn status(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let (user, _) = current_user(&state, &jar).await?;
    let providers = state.oauth.status(user.user_id).await?;
    Ok(Json(json!({ "providers": providers })))
}

/// Remove a provider link from the signed-in user.
#[utoipa::path(
    delete,
    path = "/auth/oauth/{provider}",
    params(("provider" = String, Path, description = "Provider name")),
    responses(
        (status = 200, description = "Unlinked"),
        (status = 404, description = "No such link"),
        (status = 409, description = "Only remaining login method"),
    ),
    tag = "oauth"
)]
pub async fn unlink(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(provider): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (user, _) = current_user(&state, &jar).await?;
    state.oauth.unlink(&user, &provider).await?;
    Ok(Json(json!({ "message": format!("Unlinked {}", provider) })))
}

/// The live session row behind the cookie, if any.
async fn existing_session(
    state: &AppState,
    jar: &CookieJar,
) -> Result<Option<Session>, AppError> {
    let Some(sid) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) else {
        return Ok(None);
    };

    let session = state
        .store
        .find_session(&sid)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?;

    Ok(session.filter(|s| !s.is_expired_at(Utc::now())))
}
