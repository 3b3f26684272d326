use thiserror::Error;

use crate::error::AppError;
use crate::services::store::StoreError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked, retry in {retry_after}s")]
    AccountLocked { retry_after: u64 },

    #[error("Rate limited, retry in {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Provider not configured")]
    ProviderNotConfigured,

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("OAuth state mismatch")]
    StateMismatch,

    #[error("Cannot remove the only remaining login method")]
    LastLoginMethod,

    #[error("No linked {0} account")]
    LinkNotFound(String),

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => AppError::DatabaseError(anyhow::anyhow!(e)),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::AccountLocked { retry_after } => AppError::AccountLocked(
                "Account temporarily locked due to repeated failures".to_string(),
                Some(retry_after),
            ),
            ServiceError::RateLimited { retry_after } => AppError::TooManyRequests(
                "Too many attempts. Please try again later.".to_string(),
                Some(retry_after),
            ),
            ServiceError::InvalidOrExpiredToken => {
                AppError::BadRequest(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::ProviderNotConfigured => {
                AppError::ConfigError(anyhow::anyhow!("Sign-in provider is not configured"))
            }
            ServiceError::ProviderError(_) => {
                // Provider bodies never reach the client.
                AppError::BadGateway("Sign-in provider error".to_string())
            }
            ServiceError::StateMismatch => {
                AppError::BadRequest(anyhow::anyhow!("Invalid OAuth state"))
            }
            ServiceError::LastLoginMethod => AppError::Conflict(anyhow::anyhow!(
                "Set a password before unlinking your only sign-in method"
            )),
            ServiceError::LinkNotFound(provider) => {
                AppError::NotFound(anyhow::anyhow!("No linked {} account", provider))
            }
            ServiceError::Crypto(e) => AppError::InternalError(anyhow::anyhow!(e)),
            ServiceError::EmailError(e) => AppError::EmailError(e),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}
