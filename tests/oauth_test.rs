mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::{DateTime, Utc};
use common::{default_app, seed_user, test_oauth_config, MemoryStore};
use curio_auth::models::{
    FederatedIdentity, LoginAttempt, PasswordResetToken, Session, User,
};
use curio_auth::services::{
    AuthStore, OAuthService, ProviderProfile, ProviderTokens, ServiceError, StoreError,
    TokenCipher,
};
use tower::ServiceExt;
use uuid::Uuid;

const TEST_KEY: &str = "6368616e676520746869732070617373776f726420746f206120736563726574";

fn profile(id: &str, email: Option<&str>, name: Option<&str>) -> ProviderProfile {
    ProviderProfile {
        id: id.to_string(),
        email: email.map(String::from),
        verified_email: true,
        name: name.map(String::from),
    }
}

fn tokens() -> ProviderTokens {
    ProviderTokens {
        access_token: "provider-access-token".to_string(),
        refresh_token: Some("provider-refresh-token".to_string()),
    }
}

#[tokio::test]
async fn existing_link_resolves_to_the_same_user() {
    let app = default_app();
    let user = seed_user(&app.store, "alice", "alice@example.com", "pw").await;
    let identity = FederatedIdentity::new(
        user.user_id,
        "google".into(),
        "g-123".into(),
        Some("alice@example.com".into()),
        "enc".into(),
        None,
    );
    app.store.insert_identity(&identity).await.unwrap();

    let (resolved, created) = app
        .state
        .oauth
        .resolve_user(&profile("g-123", Some("alice@example.com"), None), &tokens())
        .await
        .unwrap();

    assert!(!created);
    assert_eq!(resolved.user_id, user.user_id);
    assert_eq!(app.store.identity_rows().len(), 1);
}

#[tokio::test]
async fn email_match_links_silently_and_upgrades_verification() {
    let app = default_app();
    let mut user = User::new_federated("alice".into(), Some("alice@example.com".into()), false);
    user.password_hash = Some("$argon2id$placeholder".into());
    app.store.insert_user(&user).await.unwrap();

    let (resolved, created) = app
        .state
        .oauth
        .resolve_user(
            &profile("g-456", Some("alice@example.com"), Some("Alice")),
            &tokens(),
        )
        .await
        .unwrap();

    assert!(!created);
    assert_eq!(resolved.user_id, user.user_id);
    assert_eq!(app.store.identity_rows().len(), 1);
    // The provider vouched for the address.
    assert!(app.store.user(user.user_id).unwrap().email_verified);
}

#[tokio::test]
async fn unknown_profile_creates_a_user_with_a_derived_username() {
    let app = default_app();

    let (user, created) = app
        .state
        .oauth
        .resolve_user(
            &profile("g-789", Some("carol@example.com"), Some("Carol Q. Example")),
            &tokens(),
        )
        .await
        .unwrap();

    assert!(created);
    assert_eq!(user.username, "carolqexample");
    assert!(user.password_hash.is_none());
    assert_eq!(user.email.as_deref(), Some("carol@example.com"));
}

#[tokio::test]
async fn username_collisions_get_a_numeric_suffix() {
    let app = default_app();
    seed_user(&app.store, "carol", "other@example.com", "pw").await;

    let (user, _) = app
        .state
        .oauth
        .resolve_user(&profile("g-1", Some("carol@example.com"), Some("Carol")), &tokens())
        .await
        .unwrap();

    assert_eq!(user.username, "carol2");
}

#[tokio::test]
async fn provider_tokens_are_encrypted_at_rest() {
    let app = default_app();

    app.state
        .oauth
        .resolve_user(&profile("g-1", Some("dave@example.com"), Some("Dave")), &tokens())
        .await
        .unwrap();

    let rows = app.store.identity_rows();
    let stored = &rows[0].access_token_enc;
    assert_ne!(stored, "provider-access-token");
    assert!(stored.starts_with("v1."));

    let cipher = TokenCipher::new(TEST_KEY).unwrap();
    assert_eq!(cipher.decrypt(stored).unwrap(), "provider-access-token");
}

#[tokio::test]
async fn unlink_refuses_the_only_login_method() {
    let app = default_app();
    let (user, _) = app
        .state
        .oauth
        .resolve_user(&profile("g-1", Some("eve@example.com"), Some("Eve")), &tokens())
        .await
        .unwrap();

    let err = app.state.oauth.unlink(&user, "google").await.unwrap_err();
    assert!(matches!(err, ServiceError::LastLoginMethod));
    assert_eq!(app.store.identity_rows().len(), 1);
}

#[tokio::test]
async fn unlink_works_once_a_password_exists() {
    let app = default_app();
    let user = seed_user(&app.store, "alice", "alice@example.com", "pw").await;
    let identity = FederatedIdentity::new(
        user.user_id,
        "google".into(),
        "g-123".into(),
        None,
        "enc".into(),
        None,
    );
    app.store.insert_identity(&identity).await.unwrap();

    app.state.oauth.unlink(&user, "google").await.expect("unlink");
    assert!(app.store.identity_rows().is_empty());
}

#[tokio::test]
async fn unlink_of_a_missing_provider_is_not_found() {
    let app = default_app();
    let user = seed_user(&app.store, "alice", "alice@example.com", "pw").await;

    let err = app.state.oauth.unlink(&user, "google").await.unwrap_err();
    assert!(matches!(err, ServiceError::LinkNotFound(_)));
}

/// Replays the losing side of two concurrent callbacks: the first identity
/// lookup misses (the winner has not committed yet from this call's point of
/// view), the insert then collides with the winner's row.
struct RacingStore {
    inner: Arc<MemoryStore>,
    first_lookup_done: AtomicBool,
}

impl RacingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            first_lookup_done: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuthStore for RacingStore {
    async fn find_identity(
        &self,
        provider: &str,
        provider_user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError> {
        if !self.first_lookup_done.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_identity(provider, provider_user_id).await
    }

    async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_id(user_id).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_username(username).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.inner.find_user_by_email(email).await
    }

    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.insert_user(user).await
    }

    async fn record_login_failure(
        &self,
        user_id: Uuid,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        self.inner
            .record_login_failure(user_id, threshold, lock_until)
            .await
    }

    async fn clear_lockout(&self, user_id: Uuid) -> Result<(), StoreError> {
        self.inner.clear_lockout(user_id).await
    }

    async fn update_session_token(
        &self,
        user_id: Uuid,
        token: &str,
        expires_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner
            .update_session_token(user_id, token, expires_utc)
            .await
    }

    async fn update_email_verified(
        &self,
        user_id: Uuid,
        verified: bool,
    ) -> Result<(), StoreError> {
        self.inner.update_email_verified(user_id, verified).await
    }

    async fn complete_password_reset(
        &self,
        user_id: Uuid,
        password_hash: &str,
        token_id: Uuid,
    ) -> Result<(), StoreError> {
        self.inner
            .complete_password_reset(user_id, password_hash, token_id)
            .await
    }

    async fn insert_login_attempt(&self, attempt: &LoginAttempt) -> Result<(), StoreError> {
        self.inner.insert_login_attempt(attempt).await
    }

    async fn count_attempts_since(
        &self,
        identifier: &str,
        since: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        self.inner.count_attempts_since(identifier, since).await
    }

    async fn delete_attempts_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_attempts_before(cutoff).await
    }

    async fn insert_reset_token(&self, token: &PasswordResetToken) -> Result<(), StoreError> {
        self.inner.insert_reset_token(token).await
    }

    async fn find_reset_token(
        &self,
        token: &str,
    ) -> Result<Option<PasswordResetToken>, StoreError> {
        self.inner.find_reset_token(token).await
    }

    async fn invalidate_reset_tokens_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.invalidate_reset_tokens_for_user(user_id).await
    }

    async fn delete_dead_reset_tokens(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.delete_dead_reset_tokens(now).await
    }

    async fn find_identities_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<FederatedIdentity>, StoreError> {
        self.inner.find_identities_for_user(user_id).await
    }

    async fn insert_identity(&self, identity: &FederatedIdentity) -> Result<(), StoreError> {
        self.inner.insert_identity(identity).await
    }

    async fn insert_user_with_identity(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<(), StoreError> {
        self.inner.insert_user_with_identity(user, identity).await
    }

    async fn delete_identity(&self, user_id: Uuid, provider: &str) -> Result<u64, StoreError> {
        self.inner.delete_identity(user_id, provider).await
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.find_session(session_id).await
    }

    async fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.inner.save_session(session).await
    }

    async fn delete_sessions_for_user(&self, user_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_sessions_for_user(user_id).await
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.inner.health_check().await
    }
}

fn racing_oauth_service(store: Arc<MemoryStore>) -> OAuthService {
    OAuthService::new(
        Arc::new(RacingStore::new(store)) as Arc<dyn AuthStore>,
        TokenCipher::new(TEST_KEY).unwrap(),
        Some(test_oauth_config()),
    )
}

#[tokio::test]
async fn lost_identity_insert_race_resolves_to_the_winner() {
    let store = Arc::new(MemoryStore::new());
    let alice = seed_user(&store, "alice", "alice@example.com", "pw").await;
    // The winner's link is already committed.
    let identity = FederatedIdentity::new(
        alice.user_id,
        "google".into(),
        "g-1".into(),
        Some("alice@example.com".into()),
        "enc".into(),
        None,
    );
    store.insert_identity(&identity).await.unwrap();

    let oauth = racing_oauth_service(Arc::clone(&store));
    let (user, created) = oauth
        .resolve_user(&profile("g-1", Some("alice@example.com"), None), &tokens())
        .await
        .expect("loser resolves through the winner's rows");

    assert!(!created);
    assert_eq!(user.user_id, alice.user_id);
    assert_eq!(store.identity_rows().len(), 1);
}

#[tokio::test]
async fn lost_new_user_race_leaves_no_orphan_account() {
    let store = Arc::new(MemoryStore::new());

    // Winner: a fresh federated signup for this provider identity.
    let winner_service = OAuthService::new(
        Arc::clone(&store) as Arc<dyn AuthStore>,
        TokenCipher::new(TEST_KEY).unwrap(),
        Some(test_oauth_config()),
    );
    let (winner, created) = winner_service
        .resolve_user(&profile("g-2", None, Some("Carol")), &tokens())
        .await
        .unwrap();
    assert!(created);
    assert_eq!(winner.username, "carol");

    // Loser: same callback replayed with the winner's rows invisible to the
    // first lookup. The user+identity insert collides and rolls back.
    let oauth = racing_oauth_service(Arc::clone(&store));
    let (user, created) = oauth
        .resolve_user(&profile("g-2", None, Some("Carol")), &tokens())
        .await
        .expect("loser resolves through the winner's rows");

    assert!(!created);
    assert_eq!(user.user_id, winner.user_id);
    assert_eq!(store.identity_rows().len(), 1);
    // The rolled-back account never became visible.
    assert!(store.find_user_by_username("carol2").await.unwrap().is_none());
}

#[tokio::test]
async fn callback_with_mismatched_state_redirects_to_failure() {
    let app = default_app();

    let mut session = Session::new("test-session-id".into(), 3600);
    session.oauth_state = Some("expected-state".into());
    app.store.save_session(&session).await.unwrap();

    let router = curio_auth::build_router(app.state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/auth/oauth/callback?code=abc&state=forged-state")
                .header(header::COOKIE, "sid=test-session-id")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response.headers().get(header::LOCATION).unwrap();
    assert_eq!(location, "/login?error=signin_failed");

    // The nonce is consumed even by a failed callback.
    let stored = app.store.find_session("test-session-id").await.unwrap().unwrap();
    assert!(stored.oauth_state.is_none());
    assert!(Utc::now() < stored.expires_utc);
}

#[tokio::test]
async fn callback_without_a_session_redirects_to_failure() {
    let app = default_app();

    let router = curio_auth::build_router(app.state.clone());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/auth/oauth/callback?code=abc&state=whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/login?error=signin_failed"
    );
}
