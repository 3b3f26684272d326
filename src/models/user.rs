//! User model - the root identity record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User entity.
///
/// `password_hash` is absent for accounts created through a federated login;
/// such accounts must keep at least one identity link (enforced at unlink).
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub password_hash: Option<String>,
    pub failed_login_count: i32,
    pub locked_until: Option<DateTime<Utc>>,
    pub session_token: Option<String>,
    pub session_expires_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new password-less user (federated signups).
    pub fn new_federated(username: String, email: Option<String>, email_verified: bool) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            username,
            email,
            email_verified,
            password_hash: None,
            failed_login_count: 0,
            locked_until: None,
            session_token: None,
            session_expires_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Whether the lock timestamp is set and still in the future.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map(|until| until > now).unwrap_or(false)
    }

    /// Convert to sanitized response (no hash, no session material).
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser {
            user_id: self.user_id,
            username: self.username.clone(),
            email: self.email.clone(),
            email_verified: self.email_verified,
            created_utc: self.created_utc,
        }
    }
}

/// User view for API responses (without sensitive fields).
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub created_utc: DateTime<Utc>,
}
