//! Password reset token model.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One outstanding password reset request.
///
/// Rows are single-use: `used_utc` flips from NULL exactly once. Expired and
/// used rows stay around until the periodic sweep deletes them.
#[derive(Debug, Clone, FromRow)]
pub struct PasswordResetToken {
    pub token_id: Uuid,
    pub token: String,
    pub user_id: Uuid,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
}

impl PasswordResetToken {
    pub fn new(user_id: Uuid, token: String, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            token,
            user_id,
            created_utc: now,
            expires_utc: now + Duration::seconds(ttl_seconds),
            used_utc: None,
        }
    }

    /// Valid iff never consumed and not yet expired.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.used_utc.is_none() && self.expires_utc > now
    }
}
