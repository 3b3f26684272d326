//! Password reset endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::error::AppError;
use crate::utils::ValidatedJson;
use crate::AppState;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetRequestBody {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ResetTokenQuery {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResetCompleteBody {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 8, max = 200))]
    pub new_password: String,
}

/// Request a password reset email.
///
/// Always answers 200 with the same body; whether the email mapped to an
/// account is not observable from the response.
#[utoipa::path(
    post,
    path = "/auth/reset/request",
    request_body = ResetRequestBody,
    responses(
        (status = 200, description = "Accepted"),
        (status = 429, description = "Too many requests"),
    ),
    tag = "password-reset"
)]
pub async fn request_reset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ValidatedJson(body): ValidatedJson<ResetRequestBody>,
) -> Result<impl IntoResponse, AppError> {
    state
        .reset
        .request(&body.email, Some(addr.ip().to_string()))
        .await?;

    Ok(Json(json!({
        "message": "If that email is registered, a reset link has been sent."
    })))
}

/// Check a reset token without consuming it.
#[utoipa::path(
    get,
    path = "/auth/reset/validate",
    params(ResetTokenQuery),
    responses(
        (status = 200, description = "Validation result"),
    ),
    tag = "password-reset"
)]
pub async fn validate_reset(
    State(state): State<AppState>,
    Query(query): Query<ResetTokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let validation = state.reset.validate(&query.token).await?;

    Ok(match validation {
        Some(v) => Json(json!({ "valid": true, "username": v.username })),
        None => Json(json!({ "valid": false })),
    })
}

/// Consume a reset token and set the new password.
#[utoipa::path(
    post,
    path = "/auth/reset/complete",
    request_body = ResetCompleteBody,
    responses(
        (status = 200, description = "Password changed"),
        (status = 400, description = "Invalid or expired token"),
    ),
    tag = "password-reset"
)]
pub async fn complete_reset(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<ResetCompleteBody>,
) -> Result<impl IntoResponse, AppError> {
    state.reset.complete(&body.token, &body.new_password).await?;

    Ok(Json(json!({
        "message": "Password updated. Please sign in with your new password."
    })))
}
