//! Password reset lifecycle: request, validate, complete.
//!
//! The request phase deliberately returns success for unknown emails so the
//! endpoint cannot be used to enumerate accounts; the email side effect is
//! the only observable difference. Completion applies the password change,
//! lockout reset, session invalidation, and token consumption as one store
//! transaction.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::models::PasswordResetToken;
use crate::services::rate_limit::{RateLimiter, RatePolicy};
use crate::services::store::AuthStore;
use crate::services::{EmailProvider, ServiceError};
use crate::utils::{hash_password, random_token, Password};

/// Outcome of a successful token validation. Carries the display username
/// for the "reset password for <username>" UI, never the email or other PII.
#[derive(Debug, Clone)]
pub struct ResetValidation {
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Clone)]
pub struct PasswordResetService {
    store: Arc<dyn AuthStore>,
    email: Arc<dyn EmailProvider>,
    rate_limiter: RateLimiter,
    policy: RatePolicy,
    base_url: String,
    token_ttl_seconds: i64,
}

impl PasswordResetService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        email: Arc<dyn EmailProvider>,
        rate_limiter: RateLimiter,
        policy: RatePolicy,
        base_url: String,
        token_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            email,
            rate_limiter,
            policy,
            base_url,
            token_ttl_seconds,
        }
    }

    /// Phase 1: issue a token and mail the reset link.
    ///
    /// Returns `Ok(())` whether or not the email maps to a user, and before
    /// delivery: the send runs in a spawned task so the response time does
    /// not differ between known and unknown addresses. A delivery failure is
    /// logged inside the task; the user can simply request again.
    pub async fn request(
        &self,
        email: &str,
        client_ip: Option<String>,
    ) -> Result<(), ServiceError> {
        let identifier = email.to_lowercase();
        self.rate_limiter.check(&identifier, self.policy).await?;
        self.rate_limiter.record(&identifier, true, client_ip).await;

        let Some(user) = self.store.find_user_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        // A new request supersedes any outstanding link for this account.
        self.store
            .invalidate_reset_tokens_for_user(user.user_id)
            .await?;

        let token = random_token();
        let reset_token =
            PasswordResetToken::new(user.user_id, token.clone(), self.token_ttl_seconds);
        self.store.insert_reset_token(&reset_token).await?;

        let reset_url = format!("{}/auth/reset?token={}", self.base_url, token);
        let email_service = Arc::clone(&self.email);
        let to = email.to_string();
        let user_id = user.user_id;
        tokio::spawn(async move {
            if let Err(e) = email_service.send_password_reset_email(&to, &reset_url).await {
                tracing::error!(user_id = %user_id, error = %e, "Failed to send reset email");
            }
        });

        tracing::info!(user_id = %user.user_id, "Password reset requested");
        Ok(())
    }

    /// Phase 2: check a token without consuming it.
    ///
    /// Valid iff the row exists, is unused, and has not expired. Reads the
    /// token the caller presented, never "the latest" row for the user.
    pub async fn validate(&self, token: &str) -> Result<Option<ResetValidation>, ServiceError> {
        let Some(reset_token) = self.store.find_reset_token(token).await? else {
            return Ok(None);
        };

        if !reset_token.is_valid_at(Utc::now()) {
            return Ok(None);
        }

        let Some(user) = self.store.find_user_by_id(reset_token.user_id).await? else {
            return Ok(None);
        };

        Ok(Some(ResetValidation {
            user_id: user.user_id,
            username: user.username,
        }))
    }

    /// Phase 3: consume the token and set the new password.
    ///
    /// Expired, used, and unknown tokens all collapse into the same
    /// `InvalidOrExpiredToken` answer for the caller.
    pub async fn complete(&self, token: &str, new_password: &str) -> Result<(), ServiceError> {
        let Some(reset_token) = self.store.find_reset_token(token).await? else {
            return Err(ServiceError::InvalidOrExpiredToken);
        };

        if !reset_token.is_valid_at(Utc::now()) {
            return Err(ServiceError::InvalidOrExpiredToken);
        }

        let password_hash = hash_password(&Password::new(new_password.to_string()))
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Password hashing error: {}", e)))?;

        // One unit: new hash, lockout reset, session invalidation, token
        // consumption. Every live session dies with the old password.
        self.store
            .complete_password_reset(
                reset_token.user_id,
                password_hash.as_str(),
                reset_token.token_id,
            )
            .await?;

        tracing::info!(user_id = %reset_token.user_id, "Password reset completed");
        Ok(())
    }
}
