//! Store-backed sliding-window rate limiter.
//!
//! Counts persisted attempt rows inside `[now - window, now]` instead of
//! keeping an in-memory bucket, so the limit holds across process instances
//! and restarts. When the store is unavailable the limiter fails open: the
//! protected feature stays reachable and the degradation is logged.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::models::LoginAttempt;
use crate::services::store::AuthStore;
use crate::services::ServiceError;

/// A sliding-window policy: at most `max_attempts` per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub max_attempts: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(max_attempts: u32, window_seconds: u64) -> Self {
        Self {
            max_attempts,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Retry-After hint in whole seconds, rounded up.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = self.window.as_secs();
        if self.window.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn AuthStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Reject with `RateLimited` once the window already holds `max_attempts`
    /// records for this identifier. The protected operation must not run
    /// after a rejection.
    pub async fn check(&self, identifier: &str, policy: RatePolicy) -> Result<(), ServiceError> {
        let since = Utc::now()
            - chrono::Duration::from_std(policy.window)
                .map_err(|e| ServiceError::Internal(anyhow::anyhow!(e)))?;

        let count = match self.store.count_attempts_since(identifier, since).await {
            Ok(count) => count,
            Err(e) => {
                // Availability beats strict enforcement during an outage.
                tracing::warn!(
                    identifier = %identifier,
                    error = %e,
                    "Rate limiter store unavailable, failing open"
                );
                return Ok(());
            }
        };

        if count >= i64::from(policy.max_attempts) {
            let retry_after = policy.retry_after_seconds();
            tracing::warn!(
                identifier = %identifier,
                count = count,
                max = policy.max_attempts,
                "Rate limit tripped"
            );
            return Err(ServiceError::RateLimited { retry_after });
        }

        Ok(())
    }

    /// Append an attempt record. Recording is best-effort: a store failure
    /// here must not take down the attempt itself.
    pub async fn record(&self, identifier: &str, succeeded: bool, client_ip: Option<String>) {
        let attempt = LoginAttempt::new(identifier.to_string(), succeeded, client_ip);
        if let Err(e) = self.store.insert_login_attempt(&attempt).await {
            tracing::warn!(
                identifier = %identifier,
                error = %e,
                "Failed to record login attempt"
            );
        }
    }
}
