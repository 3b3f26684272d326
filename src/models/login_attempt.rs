//! Login attempt records - append-only audit and rate-limit log.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// One recorded attempt against a rate-limited operation.
///
/// `identifier` is whatever the caller resolved for the operation (username
/// for login, email for reset requests). Rows are immutable once written and
/// pruned by age in the background sweep.
#[derive(Debug, Clone, FromRow)]
pub struct LoginAttempt {
    pub attempt_id: Uuid,
    pub identifier: String,
    pub succeeded: bool,
    pub client_ip: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl LoginAttempt {
    pub fn new(identifier: String, succeeded: bool, client_ip: Option<String>) -> Self {
        Self {
            attempt_id: Uuid::new_v4(),
            identifier,
            succeeded,
            client_ip,
            created_utc: Utc::now(),
        }
    }
}
