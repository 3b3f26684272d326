//! Persistence port for the authentication core.
//!
//! Every component talks to storage through this trait so the Postgres
//! implementation stays swappable (and the integration tests can run against
//! an in-memory store). Methods mirror the narrow collaborator surface:
//! user reads/writes, attempt log, reset tokens, identity links, sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{FederatedIdentity, LoginAttempt, PasswordResetToken, Session, User};

/// Storage failure classification.
///
/// `Duplicate` carries unique-constraint violations so callers can resolve
/// insert races (two concurrent callbacks for the same provider identity);
/// everything else is `Unavailable` and the caller decides whether to fail
/// open (rate limiter) or propagate (everyone else).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return StoreError::Duplicate(db_err.to_string());
            }
        }
        StoreError::Unavailable(err.to_string())
    }
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    // ==================== Users ====================

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    /// Atomically bump the failed-login counter, setting the lock timestamp
    /// once the counter reaches `threshold`. Returns the updated user.
    async fn record_login_failure(
        &self,
        user_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError>;

    /// Reset the failed-login counter and clear any lock.
    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), StoreError>;

    /// Set the user's active session token and its expiry.
    async fn update_session_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn update_email_verified(&self, user_id: Uuid, verified: bool)
        -> Result<(), StoreError>;

    /// Apply the password-reset completion as one logical unit: overwrite the
    /// password hash, reset lockout state, clear the live session token,
    /// drop the user's sessions, and mark the token consumed (last).
    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        password_hash: &str,
        token_id: Uuid,
    ) -> Result<(), StoreError>;

    // ==================== Attempt log ====================

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError>;
    async fn count_attempts_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError>;
    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    // ==================== Reset tokens ====================

    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError>;
    async fn find_reset_token(&self, token: &str)
        -> Result<Option<PasswordResetToken>, StoreError>;
    /// Mark every unused token for the user consumed, so at most one link is
    /// ever actionable per account.
    async fn invalidate_reset_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;
    /// Delete rows that are already logically dead (used or expired).
    async fn delete_dead_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    // ==================== Identity links ====================

    async fn find_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError>;
    async fn find_identities_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FederatedIdentity>, StoreError>;
    async fn insert_identity(&self, identity: &FederatedIdentity) -> Result<(), StoreError>;
    /// Create a brand-new user and their first identity link atomically, so
    /// a lost callback race never leaves an orphaned user row behind.
    async fn insert_user_with_identity(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError>;
    async fn delete_identity(&self, user_id: Uuid, provider: &str) -> Result<u64, StoreError>;

    // ==================== Sessions ====================

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
    /// Upsert the session row. Returns only after the write is acknowledged.
    async fn save_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError>;

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), StoreError>;
}
