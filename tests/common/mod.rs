//! Shared test harness: an in-memory `AuthStore`, a recording email
//! provider, and state builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use curio_auth::config::{
    AuthConfig, Environment, LockoutConfig, OAuthProviderConfig, RateLimitConfig, ResetConfig,
    SessionConfig, SmtpConfig, SweepConfig,
};
use curio_auth::models::{FederatedIdentity, LoginAttempt, PasswordResetToken, Session, User};
use curio_auth::services::{AuthStore, EmailProvider, MockEmailService, StoreError};
use curio_auth::utils::{hash_password, Password};
use curio_auth::AppState;

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    attempts: Vec<LoginAttempt>,
    tokens: Vec<PasswordResetToken>,
    identities: Vec<FederatedIdentity>,
    sessions: HashMap<String, Session>,
}

/// In-memory store with the same uniqueness rules as the Postgres schema.
/// `fail_attempt_reads` simulates an outage of the attempt log.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pub fail_attempt_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.user_id == user_id)
            .cloned()
    }

    pub fn session_count_for(&self, user_id: Uuid) -> usize {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.user_id == Some(user_id))
            .count()
    }

    pub fn token_for_user(&self, user_id: Uuid) -> Option<PasswordResetToken> {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .iter()
            .find(|t| t.user_id == user_id)
            .cloned()
    }

    pub fn identity_rows(&self) -> Vec<FederatedIdentity> {
        self.inner.lock().unwrap().identities.clone()
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.user(user_id))
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .users
            .iter()
            .find(|u| u.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Duplicate("users_username_key".into()));
        }
        if user.email.is_some() && inner.users.iter().any(|u| u.email == user.email) {
            return Err(StoreError::Duplicate("users_email_key".into()));
        }
        inner.users.push(user.clone());
        Ok(())
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(user) = inner.users.iter_mut().find(|u| u.user_id == user_id) else {
            return Ok(None);
        };
        user.failed_login_count += 1;
        if user.failed_login_count >= threshold {
            user.locked_until = Some(lock_until);
        }
        user.updated_utc = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.user_id == user_id) {
            user.failed_login_count = 0;
            user.locked_until = None;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn update_session_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.user_id == user_id) {
            user.session_token = Some(token.to_string());
            user.session_expires_utc = Some(expires_utc);
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn update_email_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.user_id == user_id) {
            user.email_verified = verified;
            user.updated_utc = Utc::now();
        }
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        password_hash: &str,
        token_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.iter_mut().find(|u| u.user_id == user_id) {
            user.password_hash = Some(password_hash.to_string());
            user.failed_login_count = 0;
            user.locked_until = None;
            user.session_token = None;
            user.session_expires_utc = None;
            user.updated_utc = Utc::now();
        }
        inner.sessions.retain(|_, s| s.user_id != Some(user_id));
        if let Some(token) = inner.tokens.iter_mut().find(|t| t.token_id == token_id) {
            token.used_utc = Some(Utc::now());
        }
        Ok(())
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        if self.fail_attempt_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("attempt log down".into()));
        }
        self.inner.lock().unwrap().attempts.push(attempt.clone());
        Ok(())
    }

    async fn count_attempts_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        if self.fail_attempt_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("attempt log down".into()));
        }
        Ok(self
            .inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.identifier == identifier && a.created_utc >= since)
            .count() as i64)
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.attempts.len();
        inner.attempts.retain(|a| a.created_utc >= cutoff);
        Ok((before - inner.attempts.len()) as u64)
    }

    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tokens.iter().any(|t| t.token == token.token) {
            return Err(StoreError::Duplicate("password_reset_tokens_token_key".into()));
        }
        inner.tokens.push(token.clone());
        Ok(())
    }

    async fn find_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .tokens
            .iter()
            .find(|t| t.token == token)
            .cloned())
    }

    async fn invalidate_reset_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let mut affected = 0;
        for token in inner
            .tokens
            .iter_mut()
            .filter(|t| t.user_id == user_id && t.used_utc.is_none())
        {
            token.used_utc = Some(Utc::now());
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_dead_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.tokens.len();
        inner
            .tokens
            .retain(|t| t.used_utc.is_none() && t.expires_utc > now);
        Ok((before - inner.tokens.len()) as u64)
    }

    async fn find_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .identities
            .iter()
            .find(|i| i.provider == provider && i.provider_user_id == provider_user_id)
            .cloned())
    }

    async fn find_identities_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FederatedIdentity>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .identities
            .iter()
            .filter(|i| i.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn insert_identity(&self, identity: &FederatedIdentity) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.identities.iter().any(|i| {
            i.provider == identity.provider && i.provider_user_id == identity.provider_user_id
        }) {
            return Err(StoreError::Duplicate(
                "federated_identities_provider_key".into(),
            ));
        }
        if inner
            .identities
            .iter()
            .any(|i| i.user_id == identity.user_id && i.provider == identity.provider)
        {
            return Err(StoreError::Duplicate(
                "federated_identities_user_provider_key".into(),
            ));
        }
        inner.identities.push(identity.clone());
        Ok(())
    }

    async fn insert_user_with_identity(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError> {
        self.insert_user(user).await?;
        match self.insert_identity(identity).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll back the user row like the SQL transaction would.
                self.inner
                    .lock()
                    .unwrap()
                    .users
                    .retain(|u| u.user_id != user.user_id);
                Err(e)
            }
        }
    }

    async fn delete_identity(&self, user_id: Uuid, provider: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.identities.len();
        inner
            .identities
            .retain(|i| !(i.user_id == user_id && i.provider == provider));
        Ok((before - inner.identities.len()) as u64)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.inner.lock().unwrap().sessions.get(session_id).cloned())
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.sessions.len();
        inner.sessions.retain(|_, s| s.user_id != Some(user_id));
        Ok((before - inner.sessions.len()) as u64)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        environment: Environment::Dev,
        service_name: "curio-auth-test".into(),
        service_version: "0.0.0".into(),
        log_level: "warn".into(),
        port: 0,
        database_url: String::new(),
        allowed_origins: vec!["http://localhost:3000".into()],
        token_encryption_key: Some(
            "6368616e676520746869732070617373776f726420746f206120736563726574".into(),
        ),
        oauth: Some(test_oauth_config()),
        smtp: SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            user: String::new(),
            password: String::new(),
            from: "noreply@curio.test".into(),
        },
        reset: ResetConfig {
            base_url: "http://localhost:8080".into(),
            token_ttl_seconds: 3600,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 5,
            login_window_seconds: 900,
            reset_attempts: 3,
            reset_window_seconds: 3600,
        },
        lockout: LockoutConfig {
            threshold: 5,
            lock_seconds: 1800,
        },
        session: SessionConfig {
            ttl_seconds: 604_800,
        },
        sweep: SweepConfig {
            interval_seconds: 3600,
            attempt_retention_days: 7,
        },
    }
}

pub fn test_oauth_config() -> OAuthProviderConfig {
    OAuthProviderConfig {
        provider: "google".into(),
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
        redirect_uri: "http://localhost:8080/auth/oauth/callback".into(),
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
        token_url: "https://oauth2.googleapis.com/token".into(),
        userinfo_url: "https://www.googleapis.com/oauth2/v2/userinfo".into(),
        scopes: "openid email profile".into(),
        success_redirect: "/collection".into(),
        failure_redirect: "/login?error=signin_failed".into(),
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub email: Arc<MockEmailService>,
}

pub fn build_app(config: AuthConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let email = Arc::new(MockEmailService::new());
    let state = AppState::build(
        config,
        Arc::clone(&store) as Arc<dyn AuthStore>,
        Arc::clone(&email) as Arc<dyn EmailProvider>,
    )
    .expect("test state");
    TestApp {
        state,
        store,
        email,
    }
}

pub fn default_app() -> TestApp {
    build_app(test_config())
}

/// Wait until the recording mailer has seen `n` sends. Reset delivery is
/// spawned off the request path, so tests must rendezvous with it.
pub async fn wait_for_sends(email: &MockEmailService, n: usize) {
    for _ in 0..200 {
        if email.sent_count() >= n {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {} sent emails, got {}", n, email.sent_count());
}

/// Insert a user with a real argon2 hash for `password`.
pub async fn seed_user(store: &MemoryStore, username: &str, email: &str, password: &str) -> User {
    let hash = hash_password(&Password::new(password.to_string())).expect("hash");
    let mut user = User::new_federated(username.to_string(), Some(email.to_string()), true);
    user.password_hash = Some(hash.into_string());
    store.insert_user(&user).await.expect("seed user");
    user
}
