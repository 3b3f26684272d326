//! Session model - an opaque key-value bag attached to the request.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// A durable session row, referenced by the `sid` cookie.
///
/// Saving the row is the suspend point before any redirect that depends on
/// it: the write must be acknowledged before the response is sent.
#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub session_id: String,
    pub user_id: Option<Uuid>,
    pub oauth_state: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub expires_utc: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: String, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            user_id: None,
            oauth_state: None,
            created_utc: now,
            expires_utc: now + Duration::seconds(ttl_seconds),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }
}
