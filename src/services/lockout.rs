//! Per-account failed-login counter with automatic lockout.
//!
//! Independent of the rate limiter: this one gates the account, not a
//! request identifier, and uses a monotonic counter plus a single lock timer
//! rather than a sliding window. Store errors propagate (fail closed) since
//! the state guards credential verification.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::User;
use crate::services::store::AuthStore;
use crate::services::ServiceError;

#[derive(Clone)]
pub struct LockoutTracker {
    store: Arc<dyn AuthStore>,
    threshold: i32,
    lock_seconds: i64,
}

impl LockoutTracker {
    pub fn new(store: Arc<dyn AuthStore>, threshold: i32, lock_seconds: i64) -> Self {
        Self {
            store,
            threshold,
            lock_seconds,
        }
    }

    /// Gate a login attempt. Must be called before credential verification;
    /// a `Locked` account short-circuits with the remaining lockout seconds.
    ///
    /// Unlock is lazy: reading the status of an account whose lock has
    /// expired resets the counter and clears the timestamp first.
    pub async fn check(&self, user: &User) -> Result<(), ServiceError> {
        let now = Utc::now();
        if let Some(until) = user.locked_until {
            if until > now {
                let retry_after = (until - now).num_seconds().max(0) as u64 + 1;
                tracing::warn!(
                    user_id = %user.user_id,
                    retry_after = retry_after,
                    "Login attempt against locked account"
                );
                return Err(ServiceError::AccountLocked { retry_after });
            }
            // Lock has passed: implicit unlock before answering.
            self.store.clear_lockout(user.user_id).await?;
        }
        Ok(())
    }

    /// Count one failed attempt; engages the lock at the threshold.
    pub async fn record_failure(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let lock_until = Utc::now() + Duration::seconds(self.lock_seconds);
        let updated = self
            .store
            .record_login_failure(user_id, self.threshold, lock_until)
            .await?;

        if let Some(user) = updated {
            if user.failed_login_count >= self.threshold {
                tracing::warn!(
                    user_id = %user_id,
                    failed_count = user.failed_login_count,
                    locked_until = ?user.locked_until,
                    "Account locked after repeated failed logins"
                );
            }
        }
        Ok(())
    }

    /// A successful login resets the counter and clears any lock, even below
    /// the threshold.
    pub async fn record_success(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.store.clear_lockout(user_id).await?;
        Ok(())
    }

    /// Unconditional reset (administrative, or after a proven password
    /// reset).
    pub async fn unlock(&self, user_id: Uuid) -> Result<(), ServiceError> {
        self.store.clear_lockout(user_id).await?;
        Ok(())
    }
}
