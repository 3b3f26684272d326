//! Password login with the rate limiter and lockout tracker wired in front
//! of credential verification.

use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::models::{Session, User};
use crate::services::lockout::LockoutTracker;
use crate::services::rate_limit::{RateLimiter, RatePolicy};
use crate::services::store::AuthStore;
use crate::services::ServiceError;
use crate::utils::{random_token, verify_password, Password, PasswordHashString};

#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    rate_limiter: RateLimiter,
    lockout: LockoutTracker,
    login_policy: RatePolicy,
    session_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        rate_limiter: RateLimiter,
        lockout: LockoutTracker,
        login_policy: RatePolicy,
        session_ttl_seconds: i64,
    ) -> Self {
        Self {
            store,
            rate_limiter,
            lockout,
            login_policy,
            session_ttl_seconds,
        }
    }

    /// Password login. Order matters: rate limit, then account lookup, then
    /// lockout gate, then credential verification. Failures are recorded in
    /// both the attempt log and the per-account counter; unknown usernames
    /// and wrong passwords produce the same `InvalidCredentials` answer.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client_ip: Option<String>,
    ) -> Result<(User, Session), ServiceError> {
        let identifier = username.to_lowercase();
        self.rate_limiter.check(&identifier, self.login_policy).await?;

        let Some(user) = self.store.find_user_by_username(username).await? else {
            self.rate_limiter
                .record(&identifier, false, client_ip)
                .await;
            return Err(ServiceError::InvalidCredentials);
        };

        self.lockout.check(&user).await?;

        // Federated-only accounts have no hash; treat as a wrong password so
        // the response does not reveal how the account was created.
        let verified = match &user.password_hash {
            Some(hash) => verify_password(
                &Password::new(password.to_string()),
                &PasswordHashString::new(hash.clone()),
            ),
            None => false,
        };

        if !verified {
            self.lockout.record_failure(user.user_id).await?;
            self.rate_limiter
                .record(&identifier, false, client_ip)
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        self.lockout.record_success(user.user_id).await?;
        self.rate_limiter.record(&identifier, true, client_ip).await;

        let session = self.open_session(&user).await?;
        tracing::info!(user_id = %user.user_id, "User logged in");
        Ok((user, session))
    }

    /// Mint a fresh session and point the user row at it. Used after both
    /// password and federated logins.
    pub async fn open_session(&self, user: &User) -> Result<Session, ServiceError> {
        let mut session = Session::new(random_token(), self.session_ttl_seconds);
        session.user_id = Some(user.user_id);
        self.store.save_session(&session).await?;

        let expires = Utc::now() + Duration::seconds(self.session_ttl_seconds);
        self.store
            .update_session_token(user.user_id, &session.session_id, expires)
            .await?;

        Ok(session)
    }
}
