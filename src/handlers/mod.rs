pub mod auth;
pub mod oauth;
pub mod password;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;

use crate::error::AppError;
use crate::models::{Session, User};
use crate::AppState;

pub const SESSION_COOKIE: &str = "sid";

/// Resolve the authenticated user behind the `sid` cookie.
///
/// Authenticated means three things agree: the cookie names a live session
/// row, the row carries a user id, and that user's active session token
/// still equals the cookie. The last check is what lets a password reset
/// kill every outstanding session by clearing the user columns.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Result<(User, Session), AppError> {
    let sid = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not signed in")))?;

    let session = state
        .store
        .find_session(&sid)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not signed in")))?;

    let now = Utc::now();
    if session.is_expired_at(now) {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Session expired")));
    }

    let user_id = session
        .user_id
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not signed in")))?;

    let user = state
        .store
        .find_user_by_id(user_id)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!(e)))?
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Not signed in")))?;

    let token_current = user.session_token.as_deref() == Some(sid.as_str())
        && user
            .session_expires_utc
            .map(|exp| exp > now)
            .unwrap_or(false);
    if !token_current {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Session expired")));
    }

    Ok((user, session))
}

/// Build the `sid` cookie for a freshly opened session.
pub fn session_cookie(state: &AppState, session: &Session) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, session.session_id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.is_prod())
        .max_age(time::Duration::seconds(state.config.session.ttl_seconds))
        .build()
}
